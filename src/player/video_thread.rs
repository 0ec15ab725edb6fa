use crate::core::{now_secs, DecodedUnit, StreamInfo, Subtitle, VideoFrame};
use crate::player::av_sync::{
    compute_target_delay, vp_duration, AV_SYNC_THRESHOLD_MAX, AV_SYNC_THRESHOLD_MIN,
    DISPLAY_TOLERANCE,
};
use crate::player::context::PlaybackContext;
use crate::player::decoder::Decoder;
use crate::player::log_ctx;
use crate::player::sink::{rasterize_subtitle, VideoSink};
use crate::player::worker::{LoopControl, WorkerBody};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 视频渲染线程
///
/// 从视频队列取包解码，按 AV 同步算法决定每一帧 显示/等待/丢弃，
/// 并在显示时驱动视频时钟和字幕叠加层。
pub struct VideoRenderWorker {
    ctx: Arc<PlaybackContext>,
    decoder: Box<dyn Decoder>,
    sink: Arc<dyn VideoSink>,

    frames: VecDeque<VideoFrame>,
    decoded: VecDeque<DecodedUnit>,
    subs: VecDeque<Subtitle>,

    is_attached_pic: bool,
    max_frame_duration: f64,
    preferred_buffered_frames: usize,

    frame_timer: f64,
    last_pts: f64,
    last_estimated: f64,
    paused_at: f64,

    step_pending: bool,
    update_frame_timer: bool,
    can_skip: bool,
    last_paused: bool,
    local_paused: bool,
    local_eof: bool,
}

impl VideoRenderWorker {
    pub fn new(
        ctx: Arc<PlaybackContext>,
        stream: &StreamInfo,
        decoder: Box<dyn Decoder>,
        sink: Arc<dyn VideoSink>,
    ) -> Self {
        let max_frame_duration = ctx.max_frame_duration();
        let preferred_buffered_frames = ctx.config.preferred_buffered_frames;
        sink.set_opened(true);
        Self {
            ctx,
            decoder,
            sink,
            frames: VecDeque::new(),
            decoded: VecDeque::new(),
            subs: VecDeque::new(),
            is_attached_pic: stream.attached_pic,
            max_frame_duration,
            preferred_buffered_frames,
            frame_timer: 0.0,
            last_pts: 0.0,
            last_estimated: 0.0,
            paused_at: f64::NAN,
            step_pending: true,
            update_frame_timer: true,
            can_skip: true,
            last_paused: false,
            local_paused: false,
            local_eof: false,
        }
    }

    fn flush_state(&mut self) {
        self.ctx.vidclk.reset();
        self.ctx.set_last_video_byte_pos(-1);
        self.last_pts = 0.0;
        self.frame_timer = 0.0;
        self.frames.clear();
        self.decoded.clear();
        self.subs.clear();
        self.step_pending = true;
        self.update_frame_timer = true;
        self.can_skip = false;
        self.local_eof = false;
        self.decoder.flush();

        let mut track = self.ctx.subtitle.lock();
        if track.stream >= 0 {
            self.sink.remove_overlay();
            if let Some(decoder) = track.decoder.as_mut() {
                decoder.flush();
            }
        }
    }

    /// 解码一个包，没有取到包时返回 false
    fn decode_next(&mut self) -> bool {
        let Some(unit) = self.ctx.videoq.get() else {
            return false;
        };
        if let Err(e) = self.decoder.decode_video(&unit, &mut self.decoded) {
            warn!("{} ⚠️  视频解码失败，丢弃该包: {}", log_ctx(), e);
        }
        for unit in self.decoded.drain(..) {
            match unit {
                DecodedUnit::Video(frame) | DecodedUnit::Attachment(frame) => {
                    self.frames.push_back(frame)
                }
                _ => {}
            }
        }
        true
    }

    /// 退役过期字幕，并上传刚进入显示区间的字幕（只上传一次）
    fn update_subtitles(&mut self, width: u32, height: u32) {
        {
            let mut track = self.ctx.subtitle.lock();
            if track.stream >= 0 {
                if let Some(decoder) = track.decoder.as_mut() {
                    while self.subs.len() < 2 {
                        let Some(unit) = self.ctx.subtitleq.get() else {
                            break;
                        };
                        if let Err(e) = decoder.decode_subtitle(&unit, &mut self.subs) {
                            warn!("{} ⚠️  字幕解码失败: {}", log_ctx(), e);
                        }
                    }
                }
            }
        }

        while let Some(current) = self.subs.front() {
            let next_started = self
                .subs
                .get(1)
                .map(|next| self.last_pts > next.start_time())
                .unwrap_or(false);

            if self.last_pts > current.end_time() || next_started {
                self.sink.remove_overlay();
                self.subs.pop_front();
                continue;
            }

            if self.last_pts >= current.start_time() && !current.uploaded {
                if let Some(overlay) = rasterize_subtitle(current, width, height) {
                    self.sink.set_overlay(overlay);
                    self.sink.request_redraw();
                }
                if let Some(current) = self.subs.front_mut() {
                    current.uploaded = true;
                }
            }
            break;
        }
    }

    fn display(&self, frame: VideoFrame) {
        self.sink.set_frame(frame);
        self.sink.request_redraw();
    }
}

impl WorkerBody for VideoRenderWorker {
    fn on_flush(&mut self) {
        debug!("{} 🧹 视频线程 flush", log_ctx());
        self.flush_state();
    }

    fn on_step(&mut self) {
        self.step_pending = true;
    }

    fn on_pause_changed(&mut self, paused: bool) {
        self.local_paused = paused;
        self.ctx.vidclk.set_paused(paused);
    }

    fn is_eof(&self) -> bool {
        self.local_eof
    }

    fn iterate(&mut self) -> LoopControl {
        let poll = self.ctx.config.poll_interval();

        self.local_eof = self.frames.is_empty()
            && self.ctx.videoq.is_empty()
            && (self.decoder.eof_state() || self.is_attached_pic || self.ctx.demuxer_eof());
        self.step_pending = self.step_pending && !self.local_eof;
        let paused = (self.local_paused && !self.step_pending) || self.local_eof;

        if paused {
            if !self.last_paused {
                self.paused_at = now_secs();
                self.last_paused = true;
            }
            thread::sleep(poll);
            return LoopControl::Continue;
        } else if self.last_paused {
            // 暂停期间帧计时器整体后移
            self.can_skip = false;
            if !self.paused_at.is_nan() {
                self.frame_timer += now_secs() - self.paused_at;
            }
            self.last_paused = false;
        }

        let mut got_unit = false;
        if self.frames.len() < self.preferred_buffered_frames {
            got_unit = self.decode_next();
        }

        let Some((frame_pts, framerate_duration)) = self.frames.front().map(|f| (f.pts, f.duration))
        else {
            if !got_unit {
                thread::sleep(poll);
            }
            return LoopControl::Continue;
        };

        if self.is_attached_pic {
            // 封面不参与同步，立即显示
            if let Some(frame) = self.frames.pop_front() {
                self.display(frame);
            }
            self.step_pending = false;
            return LoopControl::Continue;
        }

        let mut force_display = false;
        let mut time = now_secs();
        if self.update_frame_timer {
            self.frame_timer = time;
            self.can_skip = false;
            self.update_frame_timer = false;
            force_display = true;
        }

        let last_duration = if force_display {
            0.0
        } else {
            vp_duration(
                self.max_frame_duration,
                frame_pts,
                self.last_pts,
                framerate_duration,
                self.last_estimated,
            )
        };
        if last_duration > 0.0 {
            self.last_estimated = last_duration;
        }

        let skip_threshold = if last_duration > 0.0 {
            last_duration
        } else {
            AV_SYNC_THRESHOLD_MIN
        };
        let target = compute_target_delay(
            last_duration,
            self.ctx.vidclk.get(),
            self.ctx.audclk.get(),
            self.max_frame_duration,
        );
        let delay = target.delay;
        let mut skip = target.too_late && self.can_skip;
        self.can_skip = true;

        let next_frame_time = self.frame_timer + delay;
        let mut time_left = next_frame_time - time;
        let force_forward = force_display || skip;
        let maybe_sleep = time_left >= DISPLAY_TOLERANCE && !force_forward;
        let mut display = !maybe_sleep;

        if maybe_sleep
            && (self.frames.len() >= self.preferred_buffered_frames || self.decoder.eof_state())
        {
            // 每次最多睡一个轮询间隔，回到循环顶部处理暂停/flush/退出后再重新计算
            thread::sleep(Duration::from_secs_f64(time_left).min(poll));
            time = now_secs();
            time_left = next_frame_time - time;
            display = time_left < DISPLAY_TOLERANCE;
        }

        if !display {
            return LoopControl::Continue;
        }
        self.step_pending = false;

        let Some(frame) = self.frames.pop_front() else {
            return LoopControl::Continue;
        };

        self.frame_timer = next_frame_time;
        self.last_pts = frame.pts;
        if frame.byte_pos >= 0 {
            self.ctx.set_last_video_byte_pos(frame.byte_pos);
        }
        if !self.last_pts.is_nan() {
            self.ctx.vidclk.set_at(self.last_pts, time);
        }

        if delay > 0.0 && -time_left > AV_SYNC_THRESHOLD_MAX {
            // 帧计时器落后太多，重新对齐
            self.frame_timer = time;
        } else if time_left <= -skip_threshold {
            skip = self.can_skip;
        }

        self.update_subtitles(frame.width, frame.height);

        if !skip {
            self.display(frame);
        } else {
            debug!("{} ⏭️  丢弃迟到的帧 pts={:.3}", log_ctx(), self.last_pts);
        }

        // 队列已经落后时连下一帧一起丢掉
        if let Some(next) = self.frames.front() {
            let duration = vp_duration(
                self.max_frame_duration,
                next.pts,
                self.last_pts,
                next.duration,
                self.last_estimated,
            );
            if now_secs() >= self.frame_timer + duration {
                self.frames.pop_front();
            }
        }

        LoopControl::Continue
    }

    fn on_exit(&mut self) {
        self.flush_state();
        self.sink.set_opened(false);
        self.sink.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EngineConfig, MediaSource};
    use crate::player::demuxer_source::Demuxer;
    use crate::player::sink::AudioControls;
    use crate::player::synthetic::{RecordingVideoSink, SyntheticDecoder, SyntheticDemuxer, SyntheticParams};
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    #[test]
    fn test_long_frame_interval_does_not_block_iteration() {
        let (tx, _rx) = unbounded();
        let ctx = Arc::new(PlaybackContext::new(
            MediaSource::from_url("synthetic://"),
            EngineConfig::default(),
            Arc::new(AudioControls::new(1.0)),
            tx,
        ));
        ctx.videoq.start();

        // 25 秒一帧
        let params = SyntheticParams::parse("duration=120&fps=0.04&audio=0").unwrap();
        let mut demuxer = SyntheticDemuxer::new(params, Arc::new(AtomicBool::new(false)));
        let stream = demuxer.streams()[0].clone();
        for _ in 0..3 {
            let unit = demuxer.read_unit().unwrap().unwrap();
            assert!(ctx.videoq.put(unit).is_ok());
        }

        let sink = Arc::new(RecordingVideoSink::new());
        let mut worker = VideoRenderWorker::new(
            ctx.clone(),
            &stream,
            Box::new(SyntheticDecoder::new(&stream)),
            sink.clone(),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.frames_shown() == 0 && Instant::now() < deadline {
            worker.iterate();
        }
        assert_eq!(sink.frames_shown(), 1);

        let poll = ctx.config.poll_interval();
        for _ in 0..5 {
            let started = Instant::now();
            assert!(matches!(worker.iterate(), LoopControl::Continue));
            assert!(started.elapsed() < poll * 5, "iterate took {:?}", started.elapsed());
        }
        assert_eq!(sink.frames_shown(), 1);
    }
}
