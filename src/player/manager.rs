use crate::core::{EngineConfig, MediaInfo, MediaSource, MediaType, PlaybackEvent, Result};
use crate::player::context::PlaybackContext;
use crate::player::demuxer_source::MediaBackend;
use crate::player::demuxer_thread::DemuxWorker;
use crate::player::log_ctx;
use crate::player::seek::SeekRequest;
use crate::player::sink::{AudioControls, Outputs};
use crate::player::worker::{WorkerHandle, WorkerOptions};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 小于该值的相对 Seek 直接忽略（秒）
const MIN_SEEK_INCREMENT: f64 = 0.1;

/// 一次打开的播放会话
struct Session {
    ctx: Arc<PlaybackContext>,
    demux: WorkerHandle,
    abort: Arc<AtomicBool>,
}

/// 播放管理器 - 应用层入口
///
/// 持有后端和输出设备，`open` 时创建共享的播放上下文并启动 Demuxer 线程，
/// 其余的线程（音频/视频渲染）由 Demuxer 线程自己管理。
/// 所有控制方法都不阻塞在解码上，只是给线程发请求。
pub struct PlaybackManager {
    config: EngineConfig,
    backend: Arc<dyn MediaBackend>,
    outputs: Outputs,
    audio_controls: Arc<AudioControls>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
    session: Option<Session>,
}

impl PlaybackManager {
    pub fn new(config: EngineConfig, backend: Arc<dyn MediaBackend>, outputs: Outputs) -> Result<Self> {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        config.validate()?;
        let (events_tx, events_rx) = unbounded();
        let audio_controls = Arc::new(AudioControls::new(config.default_volume));
        Ok(Self {
            config,
            backend,
            outputs,
            audio_controls,
            events_tx,
            events_rx,
            session: None,
        })
    }

    /// 打开媒体源（URL 或路径），已有会话会先关闭
    pub fn open_url(&mut self, url: &str) -> Result<()> {
        self.open(MediaSource::from_url(url))
    }

    /// 打开媒体源并开始播放
    ///
    /// 打开本身在 Demuxer 线程里进行，结果通过 `PlaybackEvent::Opened` /
    /// `PlaybackEvent::OpenFailed` 通知。
    pub fn open(&mut self, source: MediaSource) -> Result<()> {
        self.close();
        info!("{} 📂 打开: {}", log_ctx(), source);

        let ctx = Arc::new(PlaybackContext::new(
            source,
            self.config.clone(),
            self.audio_controls.clone(),
            self.events_tx.clone(),
        ));
        let abort = Arc::new(AtomicBool::new(false));
        let body = DemuxWorker::new(
            ctx.clone(),
            self.backend.clone(),
            self.outputs.clone(),
            abort.clone(),
        );
        // 打开网络流可能很慢，不等待首轮确认
        let options = WorkerOptions::from_config(&self.config)
            .ensure_start(false)
            .interrupt(abort.clone());
        let demux = WorkerHandle::spawn("demux", body, options)?;

        self.session = Some(Session { ctx, demux, abort });
        Ok(())
    }

    /// 停止播放并回收所有线程
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!("{} ⏹️  关闭: {}", log_ctx(), session.ctx.source);

        session.ctx.seek.cancel();
        session.abort.store(true, Ordering::Release);
        if !session.demux.join_or_abandon() {
            error!("{} ❌ Demuxer 线程未能按时退出", log_ctx());
            let _ = self
                .events_tx
                .send(PlaybackEvent::WorkerAbandoned(session.demux.name()));
        }
        info!("{} ✅ 关闭完成", log_ctx());
    }

    pub fn pause(&self) -> bool {
        self.set_paused(true)
    }

    pub fn resume(&self) -> bool {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> bool {
        match &self.session {
            Some(session) => session.demux.try_set_pause(paused),
            None => false,
        }
    }

    /// 切换暂停状态，返回切换后是否处于暂停
    pub fn toggle_pause(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let paused = !session.demux.is_paused();
        session.demux.try_set_pause(paused);
        session.demux.is_paused()
    }

    /// 切换静音，返回切换后是否静音
    pub fn toggle_mute(&self) -> bool {
        self.audio_controls.toggle_mute()
    }

    pub fn set_volume(&self, volume: f32) {
        self.audio_controls.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.audio_controls.volume()
    }

    pub fn is_muted(&self) -> bool {
        self.audio_controls.is_muted()
    }

    fn request_seek(&self, request: SeekRequest) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let accepted = session.ctx.seek.request(request);
        if accepted {
            debug!("{} Seek 请求已提交: {:?}", log_ctx(), request);
        } else {
            debug!("{} 已有 Seek 在处理，丢弃请求: {:?}", log_ctx(), request);
        }
        accepted
    }

    /// 相对当前位置 Seek（秒）
    pub fn seek_by_increment(&self, increment: f64) -> bool {
        if increment.is_nan() || increment.abs() < MIN_SEEK_INCREMENT {
            return false;
        }
        self.request_seek(SeekRequest::Increment(increment))
    }

    /// 按总时长比例 Seek（0.0 - 1.0）
    pub fn seek_by_percent(&self, percent: f64) -> bool {
        if percent.is_nan() {
            return false;
        }
        self.request_seek(SeekRequest::Percent(percent.clamp(0.0, 1.0)))
    }

    /// 跳到相对当前章节的第 `delta` 章
    pub fn seek_chapter(&self, delta: i32) -> bool {
        self.request_seek(SeekRequest::Chapter(delta))
    }

    /// 切换到下一个同类型的流（字幕切过最后一个时关闭字幕）
    pub fn cycle_stream(&self, media_type: MediaType) -> bool {
        if media_type == MediaType::Data {
            return false;
        }
        self.request_seek(SeekRequest::StreamSwitch(media_type))
    }

    /// 当前位置和总时长（秒），未知为 NaN
    pub fn playback_position(&self) -> (f64, f64) {
        match &self.session {
            Some(session) => (session.ctx.best_clock(), session.ctx.stream_duration()),
            None => (f64::NAN, f64::NAN),
        }
    }

    pub fn duration(&self) -> f64 {
        self.playback_position().1
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.demux.is_running() && !s.demux.is_paused())
            .unwrap_or(false)
    }

    /// 会话存在且 Demuxer 线程仍在运行
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.demux.is_running())
            .unwrap_or(false)
    }

    pub fn eof_reached(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.ctx.eof_notified())
            .unwrap_or(false)
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.session.as_ref().and_then(|s| s.ctx.media_info())
    }

    /// 播放事件（Opened / EndOfStream / ...）
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}
