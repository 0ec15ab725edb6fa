use crate::core::{
    EngineConfig, MediaInfo, MediaSource, PlaybackEvent, PresentationClock, StreamInfo,
};
use crate::player::decoder::Decoder;
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::seek::SeekCoordinator;
use crate::player::sink::AudioControls;
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::Sender;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

/// 当前字幕流及其解码器（Demuxer 线程打开/关闭，视频线程解码）
pub struct SubtitleTrack {
    pub stream: i32,
    pub decoder: Option<Box<dyn Decoder>>,
}

impl SubtitleTrack {
    pub fn is_active(&self) -> bool {
        self.stream >= 0 && self.decoder.is_some()
    }
}

/// 一次播放会话的共享状态
///
/// 每个字段只有一个写入线程：
/// - 队列：Demuxer 写入，对应渲染线程读取
/// - `audclk` / `last_audio_byte_pos`：音频线程
/// - `vidclk` / `last_video_byte_pos`：视频线程
/// - 流索引、时长、`demuxer_eof`、`max_frame_duration`：Demuxer 线程
/// - 音量/静音、Seek 请求：应用层
pub struct PlaybackContext {
    pub config: EngineConfig,
    pub source: MediaSource,

    pub audioq: PacketQueue,
    pub videoq: PacketQueue,
    pub subtitleq: PacketQueue,

    pub audclk: PresentationClock,
    pub vidclk: PresentationClock,

    pub seek: SeekCoordinator,
    pub audio_controls: Arc<AudioControls>,
    pub subtitle: Mutex<SubtitleTrack>,

    demuxer_eof: AtomicBool,
    eof_notified: AtomicBool,
    stream_duration: AtomicCell<f64>,
    max_frame_duration: AtomicCell<f64>,
    last_audio_byte_pos: AtomicI64,
    last_video_byte_pos: AtomicI64,
    audio_stream: AtomicI32,
    video_stream: AtomicI32,

    streams: RwLock<Vec<StreamInfo>>,
    media_info: RwLock<Option<MediaInfo>>,
    events: Sender<PlaybackEvent>,
}

impl PlaybackContext {
    pub fn new(
        source: MediaSource,
        config: EngineConfig,
        audio_controls: Arc<AudioControls>,
        events: Sender<PlaybackEvent>,
    ) -> Self {
        let capacity = config.queue_capacity;
        let tolerance = config.clock_max_tolerance;
        Self {
            source,
            audioq: PacketQueue::new(capacity),
            videoq: PacketQueue::new(capacity),
            subtitleq: PacketQueue::new(capacity),
            audclk: PresentationClock::with_tolerance(tolerance),
            vidclk: PresentationClock::with_tolerance(tolerance),
            seek: SeekCoordinator::new(),
            audio_controls,
            subtitle: Mutex::new(SubtitleTrack {
                stream: -1,
                decoder: None,
            }),
            demuxer_eof: AtomicBool::new(false),
            eof_notified: AtomicBool::new(false),
            stream_duration: AtomicCell::new(f64::NAN),
            max_frame_duration: AtomicCell::new(3600.0),
            last_audio_byte_pos: AtomicI64::new(-1),
            last_video_byte_pos: AtomicI64::new(-1),
            audio_stream: AtomicI32::new(-1),
            video_stream: AtomicI32::new(-1),
            streams: RwLock::new(Vec::new()),
            media_info: RwLock::new(None),
            events,
            config,
        }
    }

    /// 最佳播放位置：两个时钟都有效取较大者，否则取有效的那个
    pub fn best_clock(&self) -> f64 {
        let video = self.vidclk.get();
        let audio = self.audclk.get();
        match (audio.is_nan(), video.is_nan()) {
            (false, false) => audio.max(video),
            (false, true) => audio,
            _ => video,
        }
    }

    pub fn demuxer_eof(&self) -> bool {
        self.demuxer_eof.load(Ordering::Acquire)
    }

    pub fn set_demuxer_eof(&self, eof: bool) {
        self.demuxer_eof.store(eof, Ordering::Release);
    }

    /// 总时长（秒），未知为 NaN
    pub fn stream_duration(&self) -> f64 {
        self.stream_duration.load()
    }

    pub fn set_stream_duration(&self, duration: f64) {
        self.stream_duration.store(duration);
    }

    pub fn max_frame_duration(&self) -> f64 {
        self.max_frame_duration.load()
    }

    pub fn set_max_frame_duration(&self, duration: f64) {
        self.max_frame_duration.store(duration);
    }

    pub fn last_audio_byte_pos(&self) -> i64 {
        self.last_audio_byte_pos.load(Ordering::Acquire)
    }

    pub fn set_last_audio_byte_pos(&self, pos: i64) {
        self.last_audio_byte_pos.store(pos, Ordering::Release);
    }

    pub fn last_video_byte_pos(&self) -> i64 {
        self.last_video_byte_pos.load(Ordering::Acquire)
    }

    pub fn set_last_video_byte_pos(&self, pos: i64) {
        self.last_video_byte_pos.store(pos, Ordering::Release);
    }

    pub fn audio_stream(&self) -> i32 {
        self.audio_stream.load(Ordering::Acquire)
    }

    pub fn set_audio_stream(&self, index: i32) {
        self.audio_stream.store(index, Ordering::Release);
    }

    pub fn video_stream(&self) -> i32 {
        self.video_stream.load(Ordering::Acquire)
    }

    pub fn set_video_stream(&self, index: i32) {
        self.video_stream.store(index, Ordering::Release);
    }

    pub fn subtitle_stream(&self) -> i32 {
        self.subtitle.lock().stream
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.streams.read().clone()
    }

    pub fn stream(&self, index: i32) -> Option<StreamInfo> {
        self.streams.read().iter().find(|s| s.index == index).cloned()
    }

    pub fn set_streams(&self, streams: Vec<StreamInfo>) {
        *self.streams.write() = streams;
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.media_info.read().clone()
    }

    pub fn set_media_info(&self, info: MediaInfo) {
        *self.media_info.write() = Some(info);
    }

    /// 通知应用层（接收端已关闭时忽略）
    pub fn notify(&self, event: PlaybackEvent) {
        debug!("{} 📣 事件: {:?}", log_ctx(), event);
        let _ = self.events.send(event);
    }

    /// 播放结束通知，每次 EOF 只发一次
    pub fn notify_eof(&self) {
        if !self.eof_notified.swap(true, Ordering::AcqRel) {
            info!("{} 🏁 所有活动流播放完毕", log_ctx());
            self.notify(PlaybackEvent::EndOfStream);
        }
    }

    /// 离开 EOF（seek 或继续读到数据）后重新允许通知
    pub fn rearm_eof(&self) {
        self.eof_notified.store(false, Ordering::Release);
    }

    pub fn eof_notified(&self) -> bool {
        self.eof_notified.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now_secs;
    use crossbeam_channel::unbounded;

    fn context() -> (PlaybackContext, crossbeam_channel::Receiver<PlaybackEvent>) {
        let (tx, rx) = unbounded();
        let ctx = PlaybackContext::new(
            MediaSource::from_url("synthetic://"),
            EngineConfig::default(),
            Arc::new(AudioControls::new(1.0)),
            tx,
        );
        (ctx, rx)
    }

    #[test]
    fn test_best_clock() {
        let (ctx, _rx) = context();
        assert!(ctx.best_clock().is_nan());

        ctx.audclk.set_paused(true);
        ctx.vidclk.set_paused(true);
        ctx.vidclk.set_at(4.0, now_secs());
        assert_eq!(ctx.best_clock(), 4.0);

        ctx.audclk.set_at(5.0, now_secs());
        assert_eq!(ctx.best_clock(), 5.0);

        ctx.vidclk.reset();
        assert_eq!(ctx.best_clock(), 5.0);
    }

    #[test]
    fn test_eof_notified_once_until_rearmed() {
        let (ctx, rx) = context();
        ctx.notify_eof();
        ctx.notify_eof();
        assert_eq!(rx.try_iter().filter(|e| matches!(e, PlaybackEvent::EndOfStream)).count(), 1);
        ctx.rearm_eof();
        ctx.notify_eof();
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_queues_start_aborted() {
        let (ctx, _rx) = context();
        assert!(ctx.audioq.state().abort_req);
        assert!(ctx.videoq.state().abort_req);
        assert_eq!(ctx.audio_stream(), -1);
        assert!(ctx.stream_duration().is_nan());
    }
}
