use crate::core::{AudioParams, PlayerError, Result};
use crate::player::log_ctx;
use crate::player::sink::{AudioCallback, AudioSink, AudioSinkFactory};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 设备没有报告缓冲区大小时的估计值（帧）
const DEFAULT_DEVICE_FRAMES: usize = 1024;

/// 请求的配置不被支持时依次尝试的配置
const FALLBACK_CONFIGS: [(u32, u16); 6] = [
    (48000, 2),
    (44100, 2),
    (48000, 1),
    (44100, 1),
    (22050, 1),
    (22050, 2),
];

/// cpal 音频输出
///
/// 回调线程从 `AudioCallback` 的环形缓冲区拉取数据，音量和静音在回调中处理。
pub struct CpalAudioSink {
    stream: Option<Stream>,
    playing: bool,
}

// cpal::Stream 不是 Send，但它只被创建它的音频线程使用
unsafe impl Send for CpalAudioSink {}

impl CpalAudioSink {
    pub fn new() -> Self {
        Self {
            stream: None,
            playing: false,
        }
    }

    pub fn factory() -> AudioSinkFactory {
        Arc::new(|| Ok(Box::new(CpalAudioSink::new()) as Box<dyn AudioSink>))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    /// 选择设备支持的配置（支持非标准配置自动回退），同时返回设备缓冲区大小
    fn choose_config(device: &Device, wanted: AudioParams) -> Result<(StreamConfig, usize)> {
        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let candidates = std::iter::once((wanted.sample_rate, wanted.channels)).chain(FALLBACK_CONFIGS);
        for (index, (rate, channels)) in candidates.enumerate() {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let Some(range) = supported.iter().find(|s| Self::is_config_compatible(&config, s)) else {
                continue;
            };
            if index > 0 {
                warn!(
                    "{} ⚠️  音频设备不支持 {} Hz, {} 声道，回退到 {} Hz, {} 声道",
                    log_ctx(),
                    wanted.sample_rate,
                    wanted.channels,
                    rate,
                    channels
                );
            }
            let frames = match range.buffer_size() {
                SupportedBufferSize::Range { min, max } => {
                    (DEFAULT_DEVICE_FRAMES as u32).clamp(*min, *max) as usize
                }
                SupportedBufferSize::Unknown => DEFAULT_DEVICE_FRAMES,
            };
            return Ok((config, frames));
        }

        Err(PlayerError::AudioError(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            wanted.sample_rate, wanted.channels
        )))
    }
}

impl Default for CpalAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalAudioSink {
    fn open(&mut self, wanted: AudioParams, callback: AudioCallback) -> Result<(AudioParams, usize)> {
        self.close();
        info!(
            "{} 初始化音频输出: {} Hz, {} 声道",
            log_ctx(),
            wanted.sample_rate,
            wanted.channels
        );

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("{} 使用音频设备: {}", log_ctx(), device.name().unwrap_or_default());

        let (config, frames) = Self::choose_config(&device, wanted)?;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback.fill_f32(data),
                move |err| error!("音频流错误: {}", err),
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        // 打开后保持暂停，由音频线程决定何时开始
        if let Err(e) = stream.pause() {
            debug!("{} 暂停新音频流失败: {}", log_ctx(), e);
        }
        self.stream = Some(stream);
        self.playing = false;

        Ok((AudioParams::new(config.sample_rate.0, config.channels), frames))
    }

    fn set_paused(&mut self, paused: bool) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let result = if paused { stream.pause() } else { stream.play() };
        match result {
            Ok(()) => self.playing = !paused,
            Err(e) => warn!("{} ⚠️  切换音频流状态失败: {}", log_ctx(), e),
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.playing = false;
            info!("{} 音频输出已停止", log_ctx());
        }
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}
