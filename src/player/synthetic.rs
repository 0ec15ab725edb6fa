//! 内置测试图案后端
//!
//! `synthetic://` 源不依赖任何原生库：正弦波音频、纯色视频帧、定时字幕和章节，
//! 参数用 `key=value&key=value` 形式给出，例如
//! `synthetic://duration=3&subs=1&chapters=3`。
//!
//! | 参数 | 默认 | 说明 |
//! |---|---|---|
//! | duration | 5 | 时长（秒） |
//! | audio / video / subs | 1 / 1 / 0 | 是否包含该类型的流 |
//! | audio_tracks | 1 | 音频流数量 |
//! | rate / channels | 48000 / 2 | 音频参数 |
//! | fps / width / height | 25 / 64 / 36 | 视频参数 |
//! | chapters | 0 | 均分的章节数 |
//! | cover | 0 | 视频流是封面图片 |
//! | ts | 0 | 时间戳不连续（按字节 seek） |
//! | live | 0 | 实时流 |
//! | seekable | 1 | 是否支持 seek |
//!
//! 同时提供测试和演示用的输出：`NullAudioSink`（按实时速度消费采样）
//! 和 `RecordingVideoSink`（只计数）。

use crate::core::{
    AudioFrame, AudioParams, Chapter, CompressedUnit, DecodedUnit, MediaSource, MediaType,
    PixelFormat, PlayerError, Result, StreamInfo, Subtitle, SubtitleRect, VideoFrame,
};
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::{Demuxer, MediaBackend, SeekFlags};
use crate::player::log_ctx;
use crate::player::resample::{Resampler, RubatoSampleConverter};
use crate::player::seek::TIME_BASE_US;
use crate::player::sink::{AudioCallback, AudioSink, AudioSinkFactory, Outputs, VideoSink};
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 每个音频包的采样数（每声道）
const AUDIO_CHUNK: u64 = 1024;
/// 字幕间隔（秒）
const SUBTITLE_INTERVAL: f64 = 2.0;
/// 字幕显示时长（毫秒）
const SUBTITLE_DISPLAY_MS: u32 = 1500;
/// 虚拟码率（bit/s），用来生成字节位置
const SYNTHETIC_BIT_RATE: u64 = 1_440_000;
const TONE_HZ: f64 = 440.0;

/// 源参数
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub duration: f64,
    pub audio: bool,
    pub audio_tracks: u32,
    pub video: bool,
    pub subs: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub chapters: u32,
    pub cover: bool,
    pub ts: bool,
    pub live: bool,
    pub seekable: bool,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            duration: 5.0,
            audio: true,
            audio_tracks: 1,
            video: true,
            subs: false,
            sample_rate: 48000,
            channels: 2,
            fps: 25.0,
            width: 64,
            height: 36,
            chapters: 0,
            cover: false,
            ts: false,
            live: false,
            seekable: true,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PlayerError::OpenError(format!("参数 {} 的值无效: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(PlayerError::OpenError(format!("参数 {} 的值无效: {}", key, value))),
    }
}

impl SyntheticParams {
    pub fn parse(query: &str) -> Result<Self> {
        let mut params = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
            match key {
                "duration" => params.duration = parse_value(key, value)?,
                "audio" => params.audio = parse_flag(key, value)?,
                "audio_tracks" => params.audio_tracks = parse_value(key, value)?,
                "video" => params.video = parse_flag(key, value)?,
                "subs" => params.subs = parse_flag(key, value)?,
                "rate" => params.sample_rate = parse_value(key, value)?,
                "channels" => params.channels = parse_value(key, value)?,
                "fps" => params.fps = parse_value(key, value)?,
                "width" => params.width = parse_value(key, value)?,
                "height" => params.height = parse_value(key, value)?,
                "chapters" => params.chapters = parse_value(key, value)?,
                "cover" => params.cover = parse_flag(key, value)?,
                "ts" => params.ts = parse_flag(key, value)?,
                "live" => params.live = parse_flag(key, value)?,
                "seekable" => params.seekable = parse_flag(key, value)?,
                _ => warn!("{} ⚠️  忽略未知参数: {}", log_ctx(), key),
            }
        }

        if !(params.duration > 0.0) || !params.duration.is_finite() {
            return Err(PlayerError::OpenError(format!("时长无效: {}", params.duration)));
        }
        if params.video && !(params.fps > 0.0) {
            return Err(PlayerError::OpenError(format!("帧率无效: {}", params.fps)));
        }
        if params.video && (params.width == 0 || params.height == 0) {
            return Err(PlayerError::OpenError("画面尺寸无效".into()));
        }
        Ok(params)
    }

    fn bytes_per_sec(&self) -> f64 {
        SYNTHETIC_BIT_RATE as f64 / 8.0
    }

    /// 流列表：音频在前，然后是视频和字幕
    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        let mut next_index = 0;

        if self.audio {
            for _ in 0..self.audio_tracks.max(1) {
                let mut st = StreamInfo::new(next_index, MediaType::Audio, "pcm_f32le");
                st.sample_rate = self.sample_rate;
                st.channels = self.channels;
                st.duration = self.duration;
                streams.push(st);
                next_index += 1;
            }
        }
        if self.video {
            let mut st = StreamInfo::new(next_index, MediaType::Video, "rawvideo");
            st.width = self.width;
            st.height = self.height;
            st.frame_rate = self.fps;
            st.duration = self.duration;
            st.attached_pic = self.cover;
            streams.push(st);
            next_index += 1;
        }
        if self.subs {
            let mut st = StreamInfo::new(next_index, MediaType::Subtitle, "text");
            st.duration = self.duration;
            streams.push(st);
        }
        streams
    }

    pub fn chapter_list(&self) -> Vec<Chapter> {
        let n = self.chapters as f64;
        (0..self.chapters)
            .map(|i| Chapter {
                start: self.duration * i as f64 / n,
                end: self.duration * (i + 1) as f64 / n,
            })
            .collect()
    }
}

/// 合成包的负载
#[derive(Debug, Clone, Copy)]
enum SyntheticPayload {
    Audio { pts: f64, first_sample: u64, samples: u64 },
    Video { pts: f64, frame: u64 },
    Subtitle { pts: f64, number: u64 },
    Cover,
}

/// 测试图案 Demuxer
pub struct SyntheticDemuxer {
    params: SyntheticParams,
    streams: Vec<StreamInfo>,
    chapters: Vec<Chapter>,
    abort: Arc<AtomicBool>,
    audio_index: Vec<i32>,
    video_index: i32,
    subtitle_index: i32,

    next_sample: u64,
    next_frame: u64,
    next_subtitle: u64,
    byte_pos: i64,
    backlog: VecDeque<CompressedUnit>,
}

impl SyntheticDemuxer {
    pub fn new(params: SyntheticParams, abort: Arc<AtomicBool>) -> Self {
        let streams = params.streams();
        let index_of = |t: MediaType| {
            streams
                .iter()
                .find(|s| s.media_type == t)
                .map(|s| s.index)
                .unwrap_or(-1)
        };
        let audio_index = streams
            .iter()
            .filter(|s| s.media_type == MediaType::Audio)
            .map(|s| s.index)
            .collect();
        let video_index = index_of(MediaType::Video);
        let subtitle_index = index_of(MediaType::Subtitle);
        let chapters = params.chapter_list();
        Self {
            params,
            streams,
            chapters,
            abort,
            audio_index,
            video_index,
            subtitle_index,
            next_sample: 0,
            next_frame: 0,
            next_subtitle: 0,
            byte_pos: 0,
            backlog: VecDeque::new(),
        }
    }

    fn audio_time(&self) -> f64 {
        self.next_sample as f64 / self.params.sample_rate.max(1) as f64
    }

    fn video_time(&self) -> f64 {
        self.next_frame as f64 / self.params.fps
    }

    fn subtitle_time(&self) -> f64 {
        self.next_subtitle as f64 * SUBTITLE_INTERVAL
    }

    fn position_bytes(&self, seconds: f64) -> i64 {
        (seconds * self.params.bytes_per_sec()) as i64
    }

    fn set_position(&mut self, seconds: f64) {
        let seconds = seconds.clamp(0.0, self.params.duration);
        let rate = self.params.sample_rate.max(1) as f64;
        self.next_sample = ((seconds * rate) as u64 / AUDIO_CHUNK) * AUDIO_CHUNK;
        self.next_frame = (seconds * self.params.fps) as u64;
        self.next_subtitle = (seconds / SUBTITLE_INTERVAL).ceil() as u64;
        self.byte_pos = self.position_bytes(seconds);
        self.backlog.clear();
    }
}

impl Demuxer for SyntheticDemuxer {
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>> {
        if self.abort.load(Ordering::Acquire) {
            return Err(PlayerError::Interrupted);
        }
        if let Some(unit) = self.backlog.pop_front() {
            return Ok(Some(unit));
        }

        let duration = self.params.duration;
        let mut candidates: Vec<(f64, MediaType)> = Vec::with_capacity(3);
        if !self.audio_index.is_empty() && self.audio_time() < duration {
            candidates.push((self.audio_time(), MediaType::Audio));
        }
        if self.video_index >= 0 && !self.params.cover && self.video_time() < duration {
            candidates.push((self.video_time(), MediaType::Video));
        }
        if self.subtitle_index >= 0 && self.subtitle_time() < duration {
            candidates.push((self.subtitle_time(), MediaType::Subtitle));
        }

        let Some((pts, media_type)) = candidates
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
        else {
            return Ok(None);
        };

        self.byte_pos = self.byte_pos.max(self.position_bytes(pts));
        let byte_pos = self.byte_pos;
        let unit = match media_type {
            MediaType::Audio => {
                let rate = self.params.sample_rate.max(1) as u64;
                let remaining = ((duration * rate as f64) as u64).saturating_sub(self.next_sample);
                let samples = AUDIO_CHUNK.min(remaining.max(1));
                let payload = SyntheticPayload::Audio {
                    pts,
                    first_sample: self.next_sample,
                    samples,
                };
                self.next_sample += samples;
                let size = samples as usize * self.params.channels as usize * 4;
                let duration_ms = (samples * 1000 / rate) as i64;
                // 每条音轨都有同样的数据，额外的音轨放进积压队列
                for &index in &self.audio_index[1..] {
                    self.backlog.push_back(
                        CompressedUnit::new(index, Box::new(payload), size, duration_ms)
                            .with_byte_pos(byte_pos),
                    );
                }
                CompressedUnit::new(self.audio_index[0], Box::new(payload), size, duration_ms)
            }
            MediaType::Video => {
                let payload = SyntheticPayload::Video {
                    pts,
                    frame: self.next_frame,
                };
                self.next_frame += 1;
                let size = (self.params.width * self.params.height * 4) as usize;
                let duration_ms = (1000.0 / self.params.fps) as i64;
                CompressedUnit::new(self.video_index, Box::new(payload), size, duration_ms)
            }
            _ => {
                let payload = SyntheticPayload::Subtitle {
                    pts,
                    number: self.next_subtitle,
                };
                self.next_subtitle += 1;
                CompressedUnit::new(
                    self.subtitle_index,
                    Box::new(payload),
                    32,
                    SUBTITLE_DISPLAY_MS as i64,
                )
            }
        };
        Ok(Some(unit.with_byte_pos(byte_pos)))
    }

    fn seek(&mut self, target: i64, min: i64, max: i64, flags: SeekFlags) -> Result<()> {
        if !self.params.seekable {
            return Err(PlayerError::SeekError("源不支持 seek".into()));
        }

        let scale = if flags.by_bytes {
            self.params.bytes_per_sec()
        } else {
            TIME_BASE_US
        };
        let clamped = (target as f64 / scale).clamp(0.0, self.params.duration);
        let landed = (clamped * scale) as i64;
        if landed < min || landed > max {
            return Err(PlayerError::SeekError(format!(
                "目标 {} 超出范围 [{}, {}]",
                landed, min, max
            )));
        }

        self.set_position(clamped);
        debug!("{} 合成源 seek 到 {:.3}s", log_ctx(), clamped);
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        if self.params.live {
            None
        } else {
            Some(self.params.duration)
        }
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    fn start_time(&self) -> Option<f64> {
        Some(0.0)
    }

    fn is_seekable(&self) -> bool {
        self.params.seekable
    }

    fn ts_discontinuous(&self) -> bool {
        self.params.ts
    }

    fn prefers_byte_seek(&self) -> bool {
        self.params.ts
    }

    fn byte_position(&self) -> i64 {
        self.byte_pos
    }

    fn byte_size(&self) -> Option<i64> {
        Some(self.position_bytes(self.params.duration))
    }

    fn bit_rate(&self) -> Option<u64> {
        Some(SYNTHETIC_BIT_RATE)
    }

    fn is_realtime(&self) -> bool {
        self.params.live
    }

    fn pause(&mut self) {
        debug!("{} 合成源暂停读取", log_ctx());
    }

    fn play(&mut self) {
        debug!("{} 合成源恢复读取", log_ctx());
    }

    fn attached_picture(&mut self, stream_index: i32) -> Option<CompressedUnit> {
        if !self.params.cover || stream_index != self.video_index {
            return None;
        }
        let size = (self.params.width * self.params.height * 4) as usize;
        Some(CompressedUnit::new(stream_index, Box::new(SyntheticPayload::Cover), size, 0))
    }

    fn description(&self) -> String {
        format!(
            "合成源 ({:.1}s, {} 个流, {} 章)",
            self.params.duration,
            self.streams.len(),
            self.chapters.len()
        )
    }
}

/// 测试图案解码器（每种流一个实例）
pub struct SyntheticDecoder {
    stream: StreamInfo,
    eof: bool,
}

impl SyntheticDecoder {
    pub fn new(stream: &StreamInfo) -> Self {
        Self {
            stream: stream.clone(),
            eof: false,
        }
    }

    /// 处理哨兵包，返回 true 表示已处理
    fn handle_sentinel(&mut self, unit: &CompressedUnit) -> bool {
        if unit.is_eof {
            self.eof = true;
            return true;
        }
        if unit.is_flush {
            self.flush();
            return true;
        }
        false
    }

    fn payload(unit: &CompressedUnit) -> Result<SyntheticPayload> {
        unit.payload_as::<SyntheticPayload>()
            .copied()
            .ok_or_else(|| PlayerError::DecodeError(format!("流 #{} 的负载类型不匹配", unit.stream_index)))
    }

    fn solid_frame(&self, pts: f64, color: [u8; 4]) -> VideoFrame {
        let pixels = (self.stream.width * self.stream.height) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        VideoFrame {
            pts,
            duration: self.stream.frame_duration(),
            byte_pos: -1,
            width: self.stream.width,
            height: self.stream.height,
            format: PixelFormat::RGBA,
            data,
        }
    }
}

impl Decoder for SyntheticDecoder {
    fn init(&mut self, stream: &StreamInfo) -> Result<()> {
        if stream.media_type == MediaType::Audio && (stream.sample_rate == 0 || stream.channels == 0) {
            return Err(PlayerError::DecodeError("音频参数无效".into()));
        }
        self.stream = stream.clone();
        self.eof = false;
        Ok(())
    }

    fn decode_audio(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()> {
        if self.handle_sentinel(unit) {
            return Ok(());
        }
        let SyntheticPayload::Audio {
            pts,
            first_sample,
            samples,
        } = Self::payload(unit)?
        else {
            return Err(PlayerError::DecodeError("不是音频包".into()));
        };

        self.eof = false;
        let rate = self.stream.sample_rate as f64;
        let channels = self.stream.channels as usize;
        let mut data = Vec::with_capacity(samples as usize * channels);
        for i in first_sample..first_sample + samples {
            let value = (0.2 * (2.0 * PI * TONE_HZ * i as f64 / rate).sin()) as f32;
            data.extend(std::iter::repeat(value).take(channels));
        }
        out.push_back(DecodedUnit::Audio(AudioFrame {
            pts,
            duration: samples as f64 / rate,
            byte_pos: unit.byte_pos,
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            data,
        }));
        Ok(())
    }

    fn decode_video(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()> {
        if self.handle_sentinel(unit) {
            return Ok(());
        }
        self.eof = false;
        match Self::payload(unit)? {
            SyntheticPayload::Video { pts, frame } => {
                let shade = (frame * 7 % 256) as u8;
                let mut vf = self.solid_frame(pts, [shade, 255 - shade, 128, 255]);
                vf.byte_pos = unit.byte_pos;
                out.push_back(DecodedUnit::Video(vf));
            }
            SyntheticPayload::Cover => {
                out.push_back(DecodedUnit::Attachment(self.solid_frame(0.0, [200, 120, 40, 255])));
            }
            _ => return Err(PlayerError::DecodeError("不是视频包".into())),
        }
        Ok(())
    }

    fn decode_subtitle(&mut self, unit: &CompressedUnit, out: &mut VecDeque<Subtitle>) -> Result<()> {
        if self.handle_sentinel(unit) {
            return Ok(());
        }
        let SyntheticPayload::Subtitle { pts, number } = Self::payload(unit)? else {
            return Err(PlayerError::DecodeError("不是字幕包".into()));
        };

        let width = self.stream.width.max(64);
        let height = self.stream.height.max(36);
        let bar_w = width / 2;
        let bar_h = (height / 10).max(1);
        out.push_back(Subtitle {
            pts,
            start_display_time: 0,
            end_display_time: SUBTITLE_DISPLAY_MS,
            width: 0,
            height: 0,
            rects: vec![
                SubtitleRect::Text(format!("字幕 #{}", number)),
                SubtitleRect::Bitmap {
                    x: width / 4,
                    y: height * 3 / 4,
                    width: bar_w,
                    height: bar_h,
                    bgra: vec![255; (bar_w * bar_h * 4) as usize],
                },
            ],
            uploaded: false,
        });
        Ok(())
    }

    fn flush(&mut self) {
        self.eof = false;
    }

    fn eof_state(&self) -> bool {
        self.eof
    }
}

/// 测试图案后端
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_demuxer(&self, source: &MediaSource, abort: Arc<AtomicBool>) -> Result<Box<dyn Demuxer>> {
        let MediaSource::Synthetic(query) = source else {
            return Err(PlayerError::OpenError(format!(
                "合成后端只支持 synthetic:// 源: {}",
                source
            )));
        };
        let params = SyntheticParams::parse(query)?;
        info!("{} 🧪 打开合成源: {:?}", log_ctx(), params);
        Ok(Box::new(SyntheticDemuxer::new(params, abort)))
    }

    fn create_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(SyntheticDecoder::new(stream)))
    }

    fn create_resampler(&self, target: AudioParams) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(RubatoSampleConverter::new(target)?))
    }
}

struct NullAudioShared {
    playing: AtomicBool,
    running: AtomicBool,
    consumed: AtomicU64,
}

/// 空音频设备：用一个线程按实时速度从回调拉取采样并丢弃
pub struct NullAudioSink {
    shared: Arc<NullAudioShared>,
    pump: Option<JoinHandle<()>>,
    device_frames: usize,
    /// 设备固定采样率（None 时接受请求的采样率）
    device_rate: Option<u32>,
    fail_open: bool,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(NullAudioShared {
                playing: AtomicBool::new(false),
                running: AtomicBool::new(false),
                consumed: AtomicU64::new(0),
            }),
            pump: None,
            device_frames: 512,
            device_rate: None,
            fail_open: false,
        }
    }

    /// 打开总是失败的设备（模拟没有声卡）
    pub fn failing() -> Self {
        let mut sink = Self::new();
        sink.fail_open = true;
        sink
    }

    /// 只支持一个采样率的设备，解码输出需要重采样
    pub fn with_rate(sample_rate: u32) -> Self {
        let mut sink = Self::new();
        sink.device_rate = Some(sample_rate);
        sink
    }

    pub fn factory() -> AudioSinkFactory {
        Arc::new(|| Ok(Box::new(NullAudioSink::new()) as Box<dyn AudioSink>))
    }

    pub fn failing_factory() -> AudioSinkFactory {
        Arc::new(|| Ok(Box::new(NullAudioSink::failing()) as Box<dyn AudioSink>))
    }

    pub fn fixed_rate_factory(sample_rate: u32) -> AudioSinkFactory {
        Arc::new(move || Ok(Box::new(NullAudioSink::with_rate(sample_rate)) as Box<dyn AudioSink>))
    }

    /// 已消费的采样数（所有声道）
    pub fn consumed(&self) -> u64 {
        self.shared.consumed.load(Ordering::Relaxed)
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullAudioSink {
    fn open(&mut self, wanted: AudioParams, callback: AudioCallback) -> Result<(AudioParams, usize)> {
        if self.fail_open {
            return Err(PlayerError::AudioError("没有可用的音频设备".into()));
        }
        self.close();

        let params = AudioParams::new(self.device_rate.unwrap_or(wanted.sample_rate), wanted.channels);
        let shared = self.shared.clone();
        shared.running.store(true, Ordering::Release);
        shared.playing.store(false, Ordering::Release);
        let frames = self.device_frames;
        let period = Duration::from_secs_f64(frames as f64 / params.sample_rate.max(1) as f64);
        let mut buffer = vec![0.0f32; frames * params.channels.max(1) as usize];

        let pump = thread::Builder::new()
            .name("null-audio".into())
            .spawn(move || {
                while shared.running.load(Ordering::Acquire) {
                    if shared.playing.load(Ordering::Acquire) {
                        callback.fill_f32(&mut buffer);
                        shared.consumed.fetch_add(buffer.len() as u64, Ordering::Relaxed);
                    }
                    thread::sleep(period);
                }
            })?;
        self.pump = Some(pump);
        Ok((params, frames))
    }

    fn set_paused(&mut self, paused: bool) {
        self.shared.playing.store(!paused, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

impl Drop for NullAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// 只做计数的视频输出
#[derive(Default)]
pub struct RecordingVideoSink {
    opened: AtomicBool,
    frames: AtomicUsize,
    overlays: AtomicUsize,
    overlay_removals: AtomicUsize,
    redraws: AtomicUsize,
    last_pts: AtomicCell<f64>,
}

impl RecordingVideoSink {
    pub fn new() -> Self {
        Self {
            last_pts: AtomicCell::new(f64::NAN),
            ..Self::default()
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn frames_shown(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }

    pub fn overlays_shown(&self) -> usize {
        self.overlays.load(Ordering::Acquire)
    }

    pub fn overlay_removals(&self) -> usize {
        self.overlay_removals.load(Ordering::Acquire)
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::Acquire)
    }

    /// 最后显示的帧的 pts
    pub fn last_pts(&self) -> f64 {
        self.last_pts.load()
    }
}

impl VideoSink for RecordingVideoSink {
    fn set_opened(&self, opened: bool) {
        self.opened.store(opened, Ordering::Release);
    }

    fn set_frame(&self, frame: VideoFrame) {
        self.last_pts.store(frame.pts);
        self.frames.fetch_add(1, Ordering::AcqRel);
    }

    fn set_overlay(&self, _overlay: VideoFrame) {
        self.overlays.fetch_add(1, Ordering::AcqRel);
    }

    fn remove_overlay(&self) {
        self.overlay_removals.fetch_add(1, Ordering::AcqRel);
    }

    fn request_redraw(&self) {
        self.redraws.fetch_add(1, Ordering::AcqRel);
    }
}

/// 空音频设备 + 计数视频输出
pub fn null_outputs() -> (Outputs, Arc<RecordingVideoSink>) {
    let video = Arc::new(RecordingVideoSink::new());
    let outputs = Outputs {
        audio: NullAudioSink::factory(),
        video: video.clone(),
        observers: Vec::new(),
    };
    (outputs, video)
}
