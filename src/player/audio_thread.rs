use crate::core::{AudioParams, DecodedUnit, StreamInfo};
use crate::player::context::PlaybackContext;
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::MediaBackend;
use crate::player::log_ctx;
use crate::player::resample::Resampler;
use crate::player::sink::{AudioCallback, AudioObserver, AudioSink};
use crate::player::worker::{LoopControl, WorkerBody};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

/// 按设备缓冲区大小计算环形缓冲区容量（采样数）：
/// 至少容纳 `seconds` 秒，且为设备缓冲区的整数倍
pub fn ring_capacity(params: AudioParams, device_frames: usize, seconds: f64) -> usize {
    let channels = params.channels.max(1) as usize;
    let rate = params.sample_rate.max(1) as f64;
    let step = device_frames.max(1) * channels;
    let mut capacity = 0usize;
    while (capacity as f64 / rate) / (channels as f64) < seconds {
        capacity += step;
    }
    capacity
}

/// 音频渲染线程
///
/// 从音频队列取包 → 解码 → 重采样 → 写入环形缓冲区，由设备回调拉取。
/// 音频时钟只反映已经写进设备缓冲区的数据，而不是刚解码出来的数据。
pub struct AudioRenderWorker {
    ctx: Arc<PlaybackContext>,
    stream: StreamInfo,
    decoder: Box<dyn Decoder>,
    backend: Arc<dyn MediaBackend>,
    sink: Box<dyn AudioSink>,
    callback: AudioCallback,
    observers: Vec<Arc<dyn AudioObserver>>,

    resampler: Option<Box<dyn Resampler>>,
    target: AudioParams,
    device_frames: usize,
    reopen_audio: bool,
    open_failed: bool,

    frames: VecDeque<DecodedUnit>,
    resampled: Vec<f32>,
    audio_clock: f64,
    resample_delay: f64,

    step_pending: bool,
    local_paused: bool,
    local_eof: bool,
}

impl AudioRenderWorker {
    pub fn new(
        ctx: Arc<PlaybackContext>,
        stream: StreamInfo,
        decoder: Box<dyn Decoder>,
        backend: Arc<dyn MediaBackend>,
        sink: Box<dyn AudioSink>,
        observers: Vec<Arc<dyn AudioObserver>>,
    ) -> Self {
        let callback = AudioCallback::new(ctx.audio_controls.clone());
        Self {
            ctx,
            stream,
            decoder,
            backend,
            sink,
            callback,
            observers,
            resampler: None,
            target: AudioParams::default(),
            device_frames: 0,
            reopen_audio: true,
            open_failed: false,
            frames: VecDeque::new(),
            resampled: Vec::new(),
            audio_clock: f64::NAN,
            resample_delay: 0.0,
            step_pending: true,
            local_paused: false,
            local_eof: false,
        }
    }

    fn open_device(&mut self) -> bool {
        self.sink.close();

        let wanted = AudioParams::new(
            if self.stream.sample_rate > 0 { self.stream.sample_rate } else { 44100 },
            if self.stream.channels > 0 { self.stream.channels } else { 2 },
        );

        let (params, frames) = match self.sink.open(wanted, self.callback.clone()) {
            Ok(opened) => opened,
            Err(e) => {
                error!("{} ❌ 无法打开音频输出: {}", log_ctx(), e);
                return false;
            }
        };

        match self.backend.create_resampler(params) {
            Ok(resampler) => self.resampler = Some(resampler),
            Err(e) => {
                error!("{} ❌ 无法创建重采样器: {}", log_ctx(), e);
                return false;
            }
        }

        self.target = params;
        self.device_frames = frames;
        self.callback
            .resize(ring_capacity(params, frames, self.ctx.config.audio_buffer_seconds));

        info!(
            "{} 🔊 音频输出已打开: {} Hz, {} 声道, 设备缓冲 {} 帧",
            log_ctx(),
            params.sample_rate,
            params.channels,
            frames
        );
        true
    }

    /// 从写入点到扬声器的延迟（秒）
    fn latency(&self, paused: bool, ring_buffered: usize) -> f64 {
        let channels = self.target.channels.max(1) as f64;
        let rate = self.target.sample_rate.max(1) as f64;
        let device_bytes = if paused {
            (self.device_frames * 2) as f64
        } else {
            0.0
        };
        self.resample_delay
            + device_bytes / (channels * rate * std::mem::size_of::<f32>() as f64)
            + ((ring_buffered + self.resampled.len()) as f64 / channels) / rate
    }

    fn set_observers_paused(&self, paused: bool) {
        for observer in &self.observers {
            if paused {
                observer.stop();
            } else {
                observer.start();
            }
        }
    }

    fn flush_state(&mut self) {
        self.step_pending = true;
        self.local_eof = false;
        self.resample_delay = 0.0;
        self.audio_clock = f64::NAN;
        self.ctx.set_last_audio_byte_pos(-1);
        self.resampled.clear();
        self.frames.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.ctx.audclk.reset();
        self.decoder.flush();
        self.callback.clear();
        for observer in &self.observers {
            observer.clear();
        }
    }

    /// 解码一个包并把下一帧重采样到 `resampled`，没有任何进展时返回 false
    fn decode_next(&mut self) -> bool {
        let mut progressed = false;

        if self.frames.is_empty() {
            if let Some(unit) = self.ctx.audioq.get() {
                progressed = true;
                if let Err(e) = self.decoder.decode_audio(&unit, &mut self.frames) {
                    warn!("{} ⚠️  音频解码失败，丢弃该包: {}", log_ctx(), e);
                }
            }
        }

        let Some(unit) = self.frames.pop_front() else {
            return progressed;
        };

        let DecodedUnit::Audio(frame) = unit else {
            return true;
        };
        if frame.nb_samples() == 0 || frame.sample_rate == 0 {
            return true;
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return true;
        };

        match resampler.convert(&frame) {
            Ok(samples) => {
                self.resample_delay = resampler.delay();
                if !samples.is_empty() {
                    self.resampled = samples;
                    if !frame.pts.is_nan() {
                        self.audio_clock = frame.pts + frame.duration;
                    } else if !frame.duration.is_nan() && !self.audio_clock.is_nan() {
                        self.audio_clock += frame.duration;
                    } else {
                        self.audio_clock = f64::NAN;
                    }
                    if frame.byte_pos >= 0 {
                        self.ctx.set_last_audio_byte_pos(frame.byte_pos);
                    }
                }
            }
            Err(e) => warn!("{} ⚠️  重采样失败，丢弃该帧: {}", log_ctx(), e),
        }
        true
    }

    /// 尽可能多地写入环形缓冲区，剩余部分留到下一轮
    fn write_pending(&mut self) -> bool {
        let ring = self.callback.ring();
        let to_write = self.resampled.len().min(ring.available_write());
        if to_write == 0 || !ring.write(&self.resampled[..to_write]) {
            return false;
        }

        for observer in &self.observers {
            observer.buffer_audio(
                &self.resampled[..to_write],
                self.latency(false, ring.buffered()),
                self.target.sample_rate,
                self.target.channels,
            );
        }
        self.resampled.drain(..to_write);

        if !self.audio_clock.is_nan() {
            let latency = self.latency(false, ring.buffered());
            self.ctx.audclk.set(self.audio_clock - latency);
        }
        self.step_pending = false;
        true
    }
}

impl WorkerBody for AudioRenderWorker {
    fn on_flush(&mut self) {
        debug!("{} 🧹 音频线程 flush", log_ctx());
        self.flush_state();
    }

    fn on_step(&mut self) {
        self.step_pending = true;
    }

    fn on_pause_changed(&mut self, paused: bool) {
        self.local_paused = paused;
        self.ctx.audclk.set_paused(paused);
    }

    fn is_eof(&self) -> bool {
        self.local_eof || self.open_failed
    }

    fn iterate(&mut self) -> LoopControl {
        let poll = self.ctx.config.poll_interval();

        if self.reopen_audio {
            if !self.open_device() {
                // 只放弃音频流，视频继续播放
                self.open_failed = true;
                self.ctx.audioq.abort();
                self.ctx.audioq.flush();
                return LoopControl::Exit;
            }
            self.reopen_audio = false;
        }

        let ring = self.callback.ring();
        self.local_eof = self.resampled.is_empty()
            && self.frames.is_empty()
            && ring.is_empty()
            && self.ctx.audioq.is_empty()
            && (self.decoder.eof_state() || self.ctx.demuxer_eof());
        self.step_pending &= !self.local_eof;
        let paused = (self.local_paused || self.local_eof) && !self.step_pending;

        let playing = self.sink.is_playing();
        if paused && playing {
            self.set_observers_paused(true);
            self.sink.set_paused(true);
        } else if !paused && !playing {
            self.set_observers_paused(false);
            self.sink.set_paused(false);
        }

        if paused {
            let value = if self.audio_clock.is_nan() {
                self.ctx.audclk.get()
            } else {
                self.audio_clock - self.latency(true, ring.buffered())
            };
            self.ctx.audclk.set(value);
            thread::sleep(poll);
            return LoopControl::Continue;
        }

        if self.resampled.is_empty() && !self.decode_next() {
            thread::sleep(poll);
            return LoopControl::Continue;
        }

        if !self.resampled.is_empty() && !self.write_pending() {
            thread::sleep(poll);
        }

        LoopControl::Continue
    }

    fn on_exit(&mut self) {
        self.set_observers_paused(true);
        self.flush_state();
        self.sink.close();
        info!("{} 🔇 音频输出已关闭", log_ctx());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_capacity_is_multiple_of_device_buffer() {
        let params = AudioParams::new(48000, 2);
        let capacity = ring_capacity(params, 1024, 0.5);
        assert_eq!(capacity % (1024 * 2), 0);
        assert!(capacity as f64 / 2.0 / 48000.0 >= 0.5);
        assert!(((capacity - 2048) as f64 / 2.0 / 48000.0) < 0.5);
    }

    #[test]
    fn test_ring_capacity_zero_device_buffer() {
        let capacity = ring_capacity(AudioParams::new(100, 1), 0, 0.05);
        assert_eq!(capacity, 5);
    }
}
