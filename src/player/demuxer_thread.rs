use crate::core::{
    CompressedUnit, EngineConfig, MediaInfo, MediaType, PlaybackEvent, PlayerError, Result,
    StreamInfo,
};
use crate::player::audio_thread::AudioRenderWorker;
use crate::player::context::PlaybackContext;
use crate::player::demuxer_source::{Demuxer, MediaBackend, SeekFlags};
use crate::player::log_ctx;
use crate::player::packet_queue::QueueState;
use crate::player::seek::{
    next_stream_index, resolve_byte_increment, resolve_chapter, resolve_percent,
    resolve_time_increment, SeekRequest, SeekTarget, TIME_BASE_US,
};
use crate::player::sink::Outputs;
use crate::player::video_thread::VideoRenderWorker;
use crate::player::worker::{LoopControl, ScopedPauseGuard, WorkerBody, WorkerHandle, WorkerOptions};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// 时间戳不连续格式（TS）的最大帧时长
const MAX_FRAME_DURATION_DISCONT: f64 = 10.0;
const MAX_FRAME_DURATION: f64 = 3600.0;

/// 单个流的缓冲是否足够：包数超过下限，并且时长未知或超过下限
fn queue_has_enough(config: &EngineConfig, stats: &QueueState, time_base: f64) -> bool {
    stats.nb_packets > config.min_queued_units
        && (stats.duration == 0 || time_base * stats.duration as f64 > config.min_queued_seconds)
}

/// 背压判断：任一队列满、音视频总字节超限、或每个活动流都缓冲足够时停止读取
pub fn buffer_is_full(ctx: &PlaybackContext) -> bool {
    if ctx.audioq.is_full() || ctx.videoq.is_full() || ctx.subtitleq.is_full() {
        return true;
    }

    let config = &ctx.config;
    let audio = ctx.audioq.state();
    let video = ctx.videoq.state();

    let mut total_size = 0i64;
    let audio_enough = if audio.abort_req {
        true
    } else {
        total_size += audio.size.max(0);
        ctx.stream(ctx.audio_stream())
            .map(|st| queue_has_enough(config, &audio, st.time_base))
            .unwrap_or(true)
    };
    let video_enough = if video.abort_req {
        true
    } else {
        total_size += video.size.max(0);
        match ctx.stream(ctx.video_stream()) {
            Some(st) if st.attached_pic => true,
            Some(st) => queue_has_enough(config, &video, st.time_base),
            None => true,
        }
    };

    total_size > config.max_queue_bytes || (audio_enough && video_enough)
}

/// 计算位置类 Seek 的目标，无法 seek 时返回 None
fn resolve_seek_target(
    ctx: &PlaybackContext,
    demuxer: &dyn Demuxer,
    request: SeekRequest,
    seek_by_bytes: bool,
    last_seek_pos: f64,
) -> Option<SeekTarget> {
    match request {
        SeekRequest::Increment(increment) => {
            if seek_by_bytes {
                let mut pos = -1;
                if ctx.video_stream() >= 0 {
                    pos = ctx.last_video_byte_pos();
                }
                if pos < 0 && ctx.audio_stream() >= 0 {
                    pos = ctx.last_audio_byte_pos();
                }
                if pos < 0 {
                    pos = demuxer.byte_position().max(0);
                }
                Some(resolve_byte_increment(pos, increment, demuxer.bit_rate()))
            } else {
                let mut pos = ctx.best_clock();
                if pos.is_nan() {
                    pos = last_seek_pos;
                }
                Some(resolve_time_increment(pos, increment, demuxer.start_time()))
            }
        }
        SeekRequest::Percent(percent) => {
            let duration = ctx.stream_duration();
            let has_duration = duration > 0.0;
            if seek_by_bytes || !has_duration {
                if let Some(size) = demuxer.byte_size() {
                    return Some(SeekTarget::absolute((size as f64 * percent) as i64, true));
                }
            }
            if has_duration {
                info!(
                    "{} ⏩ Seek 到 {:.0}% ({:.1}s / {:.1}s)",
                    log_ctx(),
                    percent * 100.0,
                    percent * duration,
                    duration
                );
                Some(resolve_percent(percent, duration, demuxer.start_time()))
            } else {
                warn!("{} ⚠️  时长和大小都未知，忽略比例 Seek", log_ctx());
                None
            }
        }
        SeekRequest::Chapter(delta) => {
            let chapters = demuxer.chapters();
            let index = resolve_chapter(chapters, ctx.best_clock(), delta)?;
            info!("{} 📑 Seek 到第 {} 章", log_ctx(), index);
            Some(SeekTarget::absolute(
                (chapters[index].start * TIME_BASE_US) as i64,
                false,
            ))
        }
        SeekRequest::StreamSwitch(_) => None,
    }
}

/// Demuxer 线程
///
/// 唯一的生产者：打开源、启动音视频渲染线程、读取数据包分发到各队列，
/// 同时负责背压、Seek、切换流、暂停传播以及 EOF 哨兵的分发。
/// 音视频渲染线程的句柄归本线程所有，关闭时一并回收。
pub struct DemuxWorker {
    ctx: Arc<PlaybackContext>,
    backend: Arc<dyn MediaBackend>,
    outputs: Outputs,
    abort: Arc<AtomicBool>,

    demuxer: Option<Box<dyn Demuxer>>,
    streams: Vec<StreamInfo>,
    audio: Option<WorkerHandle>,
    video: Option<WorkerHandle>,

    seek_by_bytes: bool,
    realtime: bool,
    last_seek_pos: f64,
    last_audio_stream: i32,
    last_video_stream: i32,
    last_subtitle_stream: i32,

    /// 队列满时暂存的包，下一轮重试
    pending: Option<CompressedUnit>,
    local_paused: bool,
    eof: bool,
    attachments_req: bool,
}

impl DemuxWorker {
    pub fn new(
        ctx: Arc<PlaybackContext>,
        backend: Arc<dyn MediaBackend>,
        outputs: Outputs,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            backend,
            outputs,
            abort,
            demuxer: None,
            streams: Vec::new(),
            audio: None,
            video: None,
            seek_by_bytes: false,
            realtime: false,
            last_seek_pos: 0.0,
            last_audio_stream: -1,
            last_video_stream: -1,
            last_subtitle_stream: -1,
            pending: None,
            local_paused: false,
            eof: false,
            attachments_req: true,
        }
    }

    /// 打开源并启动各个流，失败时通知应用层并返回 false
    fn open(&mut self) -> bool {
        let ctx = self.ctx.clone();
        info!("{} 🎬 打开媒体源: {}", log_ctx(), ctx.source);

        let demuxer = match self.backend.open_demuxer(&ctx.source, self.abort.clone()) {
            Ok(demuxer) => demuxer,
            Err(e) => {
                error!("{} ❌ 打开媒体源失败: {}", log_ctx(), e);
                ctx.notify(PlaybackEvent::OpenFailed(e.to_string()));
                return false;
            }
        };

        self.streams = demuxer.streams().to_vec();
        ctx.set_streams(self.streams.clone());

        // 容器时长未知时取最长的流
        let duration = demuxer.duration().filter(|d| *d > 0.0).unwrap_or_else(|| {
            self.streams
                .iter()
                .map(|s| s.duration)
                .filter(|d| *d > 0.0)
                .fold(f64::NAN, f64::max)
        });
        ctx.set_stream_duration(duration);
        ctx.set_max_frame_duration(if demuxer.ts_discontinuous() {
            MAX_FRAME_DURATION_DISCONT
        } else {
            MAX_FRAME_DURATION
        });
        self.seek_by_bytes = demuxer.prefers_byte_seek();
        self.realtime = demuxer.is_realtime();
        let chapter_count = demuxer.chapters().len();
        info!(
            "{} 📊 {}: {} 个流, 时长 {:.2}s, 字节 seek: {}, 实时流: {}",
            log_ctx(),
            demuxer.description(),
            self.streams.len(),
            duration,
            self.seek_by_bytes,
            self.realtime
        );
        self.demuxer = Some(demuxer);

        // 视频优先选非封面流，音频要求参数有效
        let mut video_idx = -1;
        let mut audio_idx = -1;
        let mut subtitle_idx = -1;
        for st in &self.streams {
            match st.media_type {
                MediaType::Video => {
                    let current_is_pic = self
                        .streams
                        .iter()
                        .find(|s| s.index == video_idx)
                        .map(|s| s.attached_pic)
                        .unwrap_or(false);
                    if video_idx < 0 || current_is_pic {
                        video_idx = st.index;
                    }
                }
                MediaType::Audio if audio_idx < 0 && st.sample_rate > 0 && st.channels > 0 => {
                    audio_idx = st.index;
                }
                MediaType::Subtitle if subtitle_idx < 0 => subtitle_idx = st.index,
                _ => {}
            }
        }

        if audio_idx >= 0 {
            if let Err(e) = self.open_stream(audio_idx) {
                warn!("{} ⚠️  打开音频流 #{} 失败: {}", log_ctx(), audio_idx, e);
            }
        }
        if video_idx >= 0 {
            if let Err(e) = self.open_stream(video_idx) {
                warn!("{} ⚠️  打开视频流 #{} 失败: {}", log_ctx(), video_idx, e);
            }
            if ctx.video_stream() >= 0 && subtitle_idx >= 0 {
                if let Err(e) = self.open_stream(subtitle_idx) {
                    warn!("{} ⚠️  打开字幕流 #{} 失败: {}", log_ctx(), subtitle_idx, e);
                }
            }
        }

        if self.audio.is_none() && self.video.is_none() {
            error!("{} ❌ 没有可播放的流: {}", log_ctx(), ctx.source);
            ctx.notify(PlaybackEvent::OpenFailed(PlayerError::NoPlayableStream.to_string()));
            return false;
        }

        let info = self.build_media_info(duration, chapter_count);
        ctx.set_media_info(info.clone());
        ctx.notify(PlaybackEvent::Opened(info));
        true
    }

    fn build_media_info(&self, duration: f64, chapter_count: usize) -> MediaInfo {
        let mut info = MediaInfo {
            url: self.ctx.source.to_string(),
            duration,
            stream_count: self.streams.len(),
            chapter_count,
            ..MediaInfo::default()
        };
        if let Some(st) = self.ctx.stream(self.ctx.video_stream()) {
            info.width = st.width;
            info.height = st.height;
            info.fps = st.frame_rate;
            info.video_codec = st.codec_name.clone();
        }
        if let Some(st) = self.ctx.stream(self.ctx.audio_stream()) {
            info.audio_codec = st.codec_name.clone();
            info.sample_rate = st.sample_rate;
            info.channels = st.channels;
        }
        info
    }

    fn worker_options(&self) -> WorkerOptions {
        WorkerOptions::from_config(&self.ctx.config)
    }

    /// 打开一个流：创建解码器，启动队列，音视频流再启动渲染线程
    fn open_stream(&mut self, index: i32) -> Result<()> {
        let st = self
            .streams
            .iter()
            .find(|s| s.index == index)
            .cloned()
            .ok_or(PlayerError::InvalidStream(index))?;
        let ctx = self.ctx.clone();

        match st.media_type {
            MediaType::Audio => {
                self.last_audio_stream = index;
                let mut decoder = self.backend.create_decoder(&st)?;
                decoder.init(&st)?;
                let sink = (self.outputs.audio)()?;

                ctx.audioq.start();
                ctx.set_audio_stream(index);
                let body = AudioRenderWorker::new(
                    ctx.clone(),
                    st.clone(),
                    decoder,
                    self.backend.clone(),
                    sink,
                    self.outputs.observers.clone(),
                );
                let handle = WorkerHandle::spawn("audio", body, self.worker_options()).map_err(|e| {
                    ctx.audioq.abort();
                    ctx.set_audio_stream(-1);
                    e
                })?;
                if self.local_paused {
                    handle.try_set_pause(true);
                }
                self.audio = Some(handle);
            }
            MediaType::Video => {
                self.last_video_stream = index;
                let mut decoder = self.backend.create_decoder(&st)?;
                decoder.init(&st)?;

                ctx.videoq.start();
                ctx.set_video_stream(index);
                let body =
                    VideoRenderWorker::new(ctx.clone(), &st, decoder, self.outputs.video.clone());
                let handle = WorkerHandle::spawn("video", body, self.worker_options()).map_err(|e| {
                    ctx.videoq.abort();
                    ctx.set_video_stream(-1);
                    e
                })?;
                if self.local_paused {
                    handle.try_set_pause(true);
                }
                self.video = Some(handle);
                self.attachments_req = true;
            }
            MediaType::Subtitle => {
                let mut track = ctx.subtitle.lock();
                self.last_subtitle_stream = index;
                let mut decoder = self.backend.create_decoder(&st)?;
                decoder.init(&st)?;
                ctx.subtitleq.start();
                track.stream = index;
                track.decoder = Some(decoder);
            }
            MediaType::Data => return Err(PlayerError::InvalidStream(index)),
        }

        info!(
            "{} ✅ 打开{}流 #{} ({})",
            log_ctx(),
            st.media_type.as_str(),
            index,
            st.codec_name
        );
        Ok(())
    }

    fn join_worker(&self, handle: Option<WorkerHandle>) {
        if let Some(mut handle) = handle {
            if !handle.join_or_abandon() {
                self.ctx.notify(PlaybackEvent::WorkerAbandoned(handle.name()));
            }
        }
    }

    /// 关闭一个流：先中止队列再回收线程，最后清空队列
    fn close_stream(&mut self, index: i32) {
        let Some(st) = self.streams.iter().find(|s| s.index == index).cloned() else {
            return;
        };
        let ctx = self.ctx.clone();

        match st.media_type {
            MediaType::Audio => {
                ctx.audioq.abort();
                let handle = self.audio.take();
                self.join_worker(handle);
                ctx.audioq.flush();
                ctx.audclk.reset();
                ctx.set_audio_stream(-1);
            }
            MediaType::Video => {
                ctx.videoq.abort();
                let handle = self.video.take();
                self.join_worker(handle);
                ctx.videoq.flush();
                ctx.set_video_stream(-1);
            }
            MediaType::Subtitle => {
                let mut track = ctx.subtitle.lock();
                ctx.subtitleq.abort();
                track.decoder = None;
                ctx.subtitleq.flush();
                track.stream = -1;
            }
            MediaType::Data => return,
        }

        debug!("{} 关闭{}流 #{}", log_ctx(), st.media_type.as_str(), index);
    }

    /// 切换到下一个同类型的流
    fn cycle_stream(&mut self, media_type: MediaType) {
        let ctx = self.ctx.clone();
        let (last, current) = match media_type {
            MediaType::Video => (self.last_video_stream, ctx.video_stream()),
            MediaType::Audio => (self.last_audio_stream, ctx.audio_stream()),
            MediaType::Subtitle => (self.last_subtitle_stream, ctx.subtitle_stream()),
            MediaType::Data => return,
        };

        let Some(next) = next_stream_index(&self.streams, media_type, last, ctx.video_stream()) else {
            debug!("{} 没有其他{}流可切换", log_ctx(), media_type.as_str());
            return;
        };
        if next < 0 {
            self.last_subtitle_stream = -1;
        }

        info!(
            "{} 🔀 切换{}流: #{} -> #{}",
            log_ctx(),
            media_type.as_str(),
            current,
            next
        );
        self.close_stream(current);
        if next >= 0 {
            if let Err(e) = self.open_stream(next) {
                warn!("{} ⚠️  打开{}流 #{} 失败: {}", log_ctx(), media_type.as_str(), next, e);
            }
        }
        ctx.notify(PlaybackEvent::StreamSwitched {
            media_type,
            from: current,
            to: next,
        });
    }

    fn handle_seeking(&mut self) {
        let ctx = self.ctx.clone();
        let Some(pending) = ctx.seek.begin() else {
            return;
        };
        let request = *pending;

        if let SeekRequest::StreamSwitch(media_type) = request {
            self.cycle_stream(media_type);
        } else {
            let Some(demuxer) = self.demuxer.as_mut() else {
                return;
            };
            if !demuxer.is_seekable() {
                info!("{} 源不支持 Seek，忽略请求 {:?}", log_ctx(), request);
                return;
            }

            // 先冻结渲染线程，守卫释放时它们会 flush 并恢复
            let _audio_guard = ScopedPauseGuard::new(self.audio.as_ref());
            let _video_guard = ScopedPauseGuard::new(self.video.as_ref());

            let Some(target) = resolve_seek_target(
                &ctx,
                &**demuxer,
                request,
                self.seek_by_bytes,
                self.last_seek_pos,
            ) else {
                return;
            };
            if !target.by_bytes {
                self.last_seek_pos = target.target as f64 / TIME_BASE_US;
            }

            let flags = SeekFlags {
                by_bytes: target.by_bytes,
            };
            match demuxer.seek(target.target, target.min, target.max, flags) {
                Ok(()) => {
                    info!(
                        "{} ⏩ Seek 完成: {:?} -> {}{}",
                        log_ctx(),
                        request,
                        target.target,
                        if target.by_bytes { " 字节" } else { " us" }
                    );
                    if ctx.audio_stream() >= 0 {
                        ctx.audioq.flush();
                    }
                    if ctx.video_stream() >= 0 {
                        ctx.videoq.flush();
                    }
                    if ctx.subtitle_stream() >= 0 {
                        ctx.subtitleq.flush();
                    }
                    ctx.audclk.reset();
                    ctx.vidclk.reset();
                    self.pending = None;
                }
                Err(e) => warn!("{} ⚠️  {}: Seek 失败: {}", log_ctx(), demuxer.description(), e),
            }
        }

        self.attachments_req = true;
        self.eof = false;
        ctx.set_demuxer_eof(false);
        ctx.rearm_eof();
    }

    /// 封面流：把图片和一个 EOF 哨兵放进视频队列
    fn queue_attachments(&mut self) {
        self.attachments_req = false;
        let index = self.ctx.video_stream();
        let is_pic = self.ctx.stream(index).map(|s| s.attached_pic).unwrap_or(false);
        if !is_pic {
            return;
        }
        let Some(demuxer) = self.demuxer.as_mut() else {
            return;
        };
        if let Some(unit) = demuxer.attached_picture(index) {
            if self.ctx.videoq.put(unit).is_ok() {
                self.ctx.videoq.put_null_unit(index, true);
            }
        }
    }

    fn on_source_eof(&mut self) {
        if self.eof {
            return;
        }
        info!("{} 📄 Demuxer 到达文件末尾", log_ctx());
        self.eof = true;
        let ctx = &self.ctx;
        ctx.set_demuxer_eof(true);
        ctx.videoq.put_null_unit(ctx.video_stream(), true);
        ctx.audioq.put_null_unit(ctx.audio_stream(), true);
        ctx.subtitleq.put_null_unit(ctx.subtitle_stream(), true);
    }

    /// 把包放进对应的队列，不属于活动流的包直接丢弃
    fn route(&mut self, unit: CompressedUnit) {
        let index = unit.stream_index;
        let Some(st) = self.streams.iter().find(|s| s.index == index) else {
            debug!("{} 丢弃无效流索引 {} 的包", log_ctx(), index);
            return;
        };

        let ctx = &self.ctx;
        let queue = if index == ctx.audio_stream() {
            &ctx.audioq
        } else if index == ctx.video_stream() && !st.attached_pic {
            &ctx.videoq
        } else if index == ctx.subtitle_stream() {
            &ctx.subtitleq
        } else {
            return;
        };

        if let Err(unit) = queue.put(unit) {
            if !queue.state().abort_req {
                self.pending = Some(unit);
            }
        }
    }

    fn read_next(&mut self) {
        let poll = self.ctx.config.poll_interval();

        if let Some(unit) = self.pending.take() {
            self.route(unit);
            return;
        }

        let Some(demuxer) = self.demuxer.as_mut() else {
            return;
        };
        match demuxer.read_unit() {
            Ok(Some(unit)) => {
                if self.eof {
                    self.ctx.rearm_eof();
                }
                self.eof = false;
                self.ctx.set_demuxer_eof(false);
                self.route(unit);
            }
            Ok(None) => {
                self.on_source_eof();
                thread::sleep(poll);
            }
            Err(e) => {
                if self.abort.load(Ordering::Acquire) {
                    debug!("{} 读取被中断", log_ctx());
                } else {
                    warn!("{} ⚠️  读取包失败: {}", log_ctx(), e);
                }
                thread::sleep(poll);
            }
        }
    }
}

impl WorkerBody for DemuxWorker {
    fn on_pause_changed(&mut self, paused: bool) {
        self.local_paused = paused;
        if let Some(demuxer) = self.demuxer.as_mut() {
            if paused {
                demuxer.pause();
            } else {
                demuxer.play();
            }
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.try_set_pause(paused);
        }
        if let Some(video) = self.video.as_ref() {
            video.try_set_pause(paused);
        }
        info!("{} {} 播放", log_ctx(), if paused { "⏸️  暂停" } else { "▶️  恢复" });
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn iterate(&mut self) -> LoopControl {
        if self.demuxer.is_none() {
            return if self.open() {
                LoopControl::Continue
            } else {
                LoopControl::Exit
            };
        }

        let ctx = self.ctx.clone();
        let poll = ctx.config.poll_interval();

        if self.local_paused {
            if self.realtime {
                thread::sleep(poll);
                return LoopControl::Continue;
            }
        } else {
            let audio_done = self.audio.as_ref().map_or(true, |h| h.eof_reached());
            let video_done = self.video.as_ref().map_or(true, |h| h.eof_reached());
            if audio_done && video_done {
                ctx.notify_eof();
            }
        }

        self.handle_seeking();

        if self.attachments_req {
            self.queue_attachments();
        }

        if (ctx.video_stream() >= 0 || ctx.audio_stream() >= 0) && buffer_is_full(&ctx) {
            thread::sleep(poll);
            return LoopControl::Continue;
        }

        self.read_next();
        LoopControl::Continue
    }

    fn on_exit(&mut self) {
        let ctx = self.ctx.clone();
        self.close_stream(ctx.audio_stream());
        self.close_stream(ctx.video_stream());
        self.close_stream(ctx.subtitle_stream());
        self.demuxer = None;
        self.pending = None;
        info!("{} 🛑 Demuxer 线程结束: {}", log_ctx(), ctx.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaSource;
    use crate::player::sink::AudioControls;
    use crossbeam_channel::unbounded;

    fn context(config: EngineConfig) -> PlaybackContext {
        let (tx, _rx) = unbounded();
        let ctx = PlaybackContext::new(
            MediaSource::from_url("synthetic://"),
            config,
            Arc::new(AudioControls::new(1.0)),
            tx,
        );
        let mut audio = StreamInfo::new(0, MediaType::Audio, "pcm");
        audio.time_base = 0.01;
        let mut video = StreamInfo::new(1, MediaType::Video, "raw");
        video.time_base = 0.01;
        ctx.set_streams(vec![audio, video]);
        ctx.set_audio_stream(0);
        ctx.set_video_stream(1);
        ctx.audioq.start();
        ctx.videoq.start();
        ctx
    }

    fn fill(ctx: &PlaybackContext, stream: i32, count: usize, duration: i64) {
        let queue = if stream == 0 { &ctx.audioq } else { &ctx.videoq };
        for _ in 0..count {
            queue
                .put(CompressedUnit::new(stream, Box::new(()), 100, duration))
                .unwrap();
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            min_queued_units: 5,
            min_queued_seconds: 1.0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_empty_queues_not_full() {
        let ctx = context(small_config());
        assert!(!buffer_is_full(&ctx));
    }

    #[test]
    fn test_full_when_every_stream_has_enough() {
        let ctx = context(small_config());
        fill(&ctx, 0, 6, 20);
        assert!(!buffer_is_full(&ctx));
        fill(&ctx, 1, 6, 20);
        assert!(buffer_is_full(&ctx));
    }

    #[test]
    fn test_count_alone_is_not_enough_without_duration() {
        let ctx = context(small_config());
        // 6 个包，每个 0.05s：数量够了但时长不够
        fill(&ctx, 0, 6, 5);
        fill(&ctx, 1, 6, 5);
        assert!(!buffer_is_full(&ctx));
    }

    #[test]
    fn test_inactive_stream_counts_as_enough() {
        let ctx = context(small_config());
        ctx.videoq.abort();
        fill(&ctx, 0, 6, 20);
        assert!(buffer_is_full(&ctx));
    }

    #[test]
    fn test_attached_picture_exempt() {
        let ctx = context(small_config());
        let mut streams = ctx.streams();
        streams[1].attached_pic = true;
        ctx.set_streams(streams);
        fill(&ctx, 0, 6, 20);
        assert!(buffer_is_full(&ctx));
    }

    #[test]
    fn test_byte_cap_and_capacity() {
        let ctx = context(EngineConfig {
            max_queue_bytes: 1,
            ..small_config()
        });
        fill(&ctx, 0, 1, 1);
        assert!(buffer_is_full(&ctx));

        let ctx = context(EngineConfig {
            queue_capacity: 2,
            ..small_config()
        });
        fill(&ctx, 1, 2, 1);
        assert!(buffer_is_full(&ctx));
    }
}
