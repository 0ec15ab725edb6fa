use crate::core::{AudioFrame, AudioParams, PlayerError, Result};
use log::debug;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

/// 重采样器：把解码输出转换成音频设备的格式（交错 f32）
pub trait Resampler: Send {
    /// 转换一帧，返回交错采样（可能为空：输入还不够一个处理块）
    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>>;

    /// 内部缓冲造成的延迟（秒）
    fn delay(&self) -> f64;

    /// 丢弃内部状态（seek 之后）
    fn reset(&mut self);
}

/// rubato 每次处理的输入帧数
const CHUNK_FRAMES: usize = 1024;

/// 基于 rubato 的重采样器（合成源等不走 FFmpeg 的路径使用）
///
/// 声道数先映射到目标布局，采样率相同时直接透传。
pub struct RubatoSampleConverter {
    target: AudioParams,
    source: Option<AudioParams>,
    resampler: Option<FastFixedIn<f32>>,
    /// 平面格式的待处理输入
    pending: Vec<Vec<f32>>,
}

impl RubatoSampleConverter {
    pub fn new(target: AudioParams) -> Result<Self> {
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(PlayerError::ResampleError(format!(
                "无效的目标格式: {} Hz, {} 声道",
                target.sample_rate, target.channels
            )));
        }
        Ok(Self {
            target,
            source: None,
            resampler: None,
            pending: Vec::new(),
        })
    }

    fn configure(&mut self, source: AudioParams) -> Result<()> {
        debug!(
            "重采样: {} Hz {} 声道 -> {} Hz {} 声道",
            source.sample_rate, source.channels, self.target.sample_rate, self.target.channels
        );
        let channels = self.target.channels as usize;
        self.source = Some(source);
        self.pending = vec![Vec::new(); channels];
        self.resampler = if source.sample_rate == self.target.sample_rate {
            None
        } else {
            let ratio = self.target.sample_rate as f64 / source.sample_rate as f64;
            let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK_FRAMES, channels)
                .map_err(|e| PlayerError::ResampleError(e.to_string()))?;
            Some(resampler)
        };
        Ok(())
    }
}

/// 声道映射：单声道复制到所有声道，多声道转单声道取平均，其余按位置截取/补零
fn map_channels(data: &[f32], in_channels: usize, out_channels: usize) -> Vec<f32> {
    if in_channels == out_channels {
        return data.to_vec();
    }
    let frames = data.len() / in_channels;
    let mut out = Vec::with_capacity(frames * out_channels);
    for frame in data.chunks_exact(in_channels) {
        if in_channels == 1 {
            out.extend(std::iter::repeat(frame[0]).take(out_channels));
        } else if out_channels == 1 {
            out.push(frame.iter().sum::<f32>() / in_channels as f32);
        } else {
            for ch in 0..out_channels {
                out.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    out
}

impl Resampler for RubatoSampleConverter {
    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>> {
        if frame.sample_rate == 0 || frame.channels == 0 {
            return Err(PlayerError::ResampleError("输入帧格式无效".into()));
        }

        let source = AudioParams::new(frame.sample_rate, frame.channels);
        if self.source != Some(source) {
            self.configure(source)?;
        }

        let channels = self.target.channels as usize;
        let mapped = map_channels(&frame.data, frame.channels as usize, channels);
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(mapped);
        };

        for sample in mapped.chunks_exact(channels) {
            for (plane, value) in self.pending.iter_mut().zip(sample) {
                plane.push(*value);
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.first().map_or(0, Vec::len) < needed {
                break;
            }
            let input: Vec<&[f32]> = self.pending.iter().map(|plane| &plane[..needed]).collect();
            let planes = resampler
                .process(&input, None)
                .map_err(|e| PlayerError::ResampleError(e.to_string()))?;
            for plane in &mut self.pending {
                plane.drain(..needed);
            }

            let frames = planes.first().map_or(0, Vec::len);
            out.reserve(frames * channels);
            for i in 0..frames {
                out.extend(planes.iter().map(|plane| plane[i]));
            }
        }
        Ok(out)
    }

    fn delay(&self) -> f64 {
        match (self.source, self.resampler.as_ref()) {
            (Some(source), Some(resampler)) => {
                let queued = self.pending.first().map_or(0, Vec::len) as f64 / source.sample_rate as f64;
                queued + resampler.output_delay() as f64 / self.target.sample_rate as f64
            }
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.source = None;
        self.resampler = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rate: u32, channels: u16, data: Vec<f32>) -> AudioFrame {
        AudioFrame {
            pts: 0.0,
            duration: 0.0,
            byte_pos: -1,
            sample_rate: rate,
            channels,
            data,
        }
    }

    #[test]
    fn test_passthrough_same_format() {
        let mut rs = RubatoSampleConverter::new(AudioParams::new(48000, 2)).unwrap();
        let out = rs.convert(&frame(48000, 2, vec![0.1, 0.2, 0.3, 0.4])).unwrap();
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(rs.delay(), 0.0);
    }

    #[test]
    fn test_mono_to_stereo() {
        let mut rs = RubatoSampleConverter::new(AudioParams::new(48000, 2)).unwrap();
        let out = rs.convert(&frame(48000, 1, vec![0.5, -0.5])).unwrap();
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_rate_conversion_output_length() {
        let mut rs = RubatoSampleConverter::new(AudioParams::new(48000, 1)).unwrap();
        let mut total = 0;
        for _ in 0..20 {
            let out = rs.convert(&frame(24000, 1, vec![0.25; 512])).unwrap();
            total += out.len();
        }
        // 10240 个输入采样按 1024 一块处理，全部消耗 -> 约 20480 个输出采样
        assert!((total as i64 - 20480).abs() <= 8, "total = {}", total);
        assert_eq!(rs.pending[0].len(), 0);
    }

    #[test]
    fn test_partial_chunk_is_held_back() {
        let mut rs = RubatoSampleConverter::new(AudioParams::new(44100, 2)).unwrap();
        let out = rs.convert(&frame(48000, 2, vec![0.1; 200])).unwrap();
        assert!(out.is_empty());
        assert!(rs.delay() >= 100.0 / 48000.0);

        rs.reset();
        assert_eq!(rs.delay(), 0.0);
    }

    #[test]
    fn test_invalid_target_rejected() {
        assert!(RubatoSampleConverter::new(AudioParams::new(0, 2)).is_err());
    }
}
