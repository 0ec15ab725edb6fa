//! Seek 请求与协调
//!
//! 任何线程都可以提交 Seek 请求，只有 Demuxer 线程消费。
//! 提交使用非阻塞 try_lock：已有请求未处理（或正在处理）时新请求直接丢弃（先到先得）。

use crate::core::{Chapter, MediaType, StreamInfo};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

/// 微秒时间基，对应 Demuxer 的 seek 单位
pub const TIME_BASE_US: f64 = 1_000_000.0;

/// 没有码率信息时按字节 seek 使用的估算速率（字节/秒）
pub const FALLBACK_BYTES_PER_SEC: f64 = 180_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekRequest {
    /// 相对当前位置的增量（秒）
    Increment(f64),
    /// 总时长的比例 0.0 - 1.0
    Percent(f64),
    /// 章节偏移（+1 下一章，-1 上一章）
    Chapter(i32),
    /// 切换到下一个同类型的流
    StreamSwitch(MediaType),
}

/// Seek 协调器（不是线程，只是一把锁加两个标志）
///
/// 锁只在存取请求的瞬间持有；正在执行的 seek 由 `in_flight` 标记，
/// Demuxer 做 seek I/O 和切换流时不持有任何锁。
#[derive(Default)]
pub struct SeekCoordinator {
    pending: Mutex<Option<SeekRequest>>,
    requested: AtomicBool,
    in_flight: AtomicBool,
}

impl SeekCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交请求，被丢弃时返回 false
    pub fn request(&self, request: SeekRequest) -> bool {
        let Some(mut slot) = self.pending.try_lock() else {
            return false;
        };
        if slot.is_some() || self.is_in_flight() {
            return false;
        }
        *slot = Some(request);
        self.requested.store(true, Ordering::Release);
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 取出待处理的请求。守卫存活期间提交的请求都会被丢弃，
    /// 守卫释放时允许新的请求。
    pub fn begin(&self) -> Option<PendingSeek<'_>> {
        if !self.is_requested() {
            return None;
        }
        let mut slot = self.pending.lock();
        let request = slot.take()?;
        // 持锁期间置位，request() 不会看到“空槽位且未在处理”的中间状态
        self.in_flight.store(true, Ordering::Release);
        drop(slot);
        Some(PendingSeek {
            coordinator: self,
            request,
        })
    }

    /// 丢弃待处理的请求（关闭播放时）
    pub fn cancel(&self) {
        *self.pending.lock() = None;
        self.requested.store(false, Ordering::Release);
    }
}

/// 正在处理的 Seek
pub struct PendingSeek<'a> {
    coordinator: &'a SeekCoordinator,
    request: SeekRequest,
}

impl Deref for PendingSeek<'_> {
    type Target = SeekRequest;

    fn deref(&self) -> &SeekRequest {
        &self.request
    }
}

impl Drop for PendingSeek<'_> {
    fn drop(&mut self) {
        self.coordinator.requested.store(false, Ordering::Release);
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

/// 解析后的 Demuxer seek 目标（微秒或字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    pub target: i64,
    pub min: i64,
    pub max: i64,
    pub by_bytes: bool,
}

impl SeekTarget {
    /// 根据相对增量生成 seek 窗口：向前 seek 时不允许落在起点之前，反之亦然。
    /// ±2 用来容忍取整方向的误差。
    pub fn new(target: i64, rel: i64, by_bytes: bool) -> Self {
        let min = if rel > 0 { target - rel + 2 } else { i64::MIN };
        let max = if rel < 0 { target - rel - 2 } else { i64::MAX };
        Self {
            target,
            min,
            max,
            by_bytes,
        }
    }

    pub fn absolute(target: i64, by_bytes: bool) -> Self {
        Self::new(target, 0, by_bytes)
    }
}

/// 按时间的相对 seek：从当前位置加增量，不早于源的起始时间
pub fn resolve_time_increment(position: f64, increment: f64, start_time: Option<f64>) -> SeekTarget {
    let mut pos = position + increment;
    if let Some(start) = start_time {
        if pos < start {
            pos = start;
        }
    }
    SeekTarget::new(
        (pos * TIME_BASE_US) as i64,
        (increment * TIME_BASE_US) as i64,
        false,
    )
}

/// 按字节的相对 seek：用码率把秒换算成字节
pub fn resolve_byte_increment(byte_pos: i64, increment: f64, bit_rate: Option<u64>) -> SeekTarget {
    let bytes_per_sec = match bit_rate {
        Some(rate) if rate > 0 => rate as f64 / 8.0,
        _ => FALLBACK_BYTES_PER_SEC,
    };
    let rel = increment * bytes_per_sec;
    let pos = (byte_pos.max(0) as f64 + rel).max(0.0);
    SeekTarget::new(pos as i64, rel as i64, true)
}

/// 比例 seek（按时长）
pub fn resolve_percent(percent: f64, duration: f64, start_time: Option<f64>) -> SeekTarget {
    let ts = percent * duration * TIME_BASE_US + start_time.unwrap_or(0.0) * TIME_BASE_US;
    SeekTarget::absolute(ts as i64, false)
}

/// 章节 seek：找到当前位置所在的章节再加偏移，越过最后一章时返回 None
pub fn resolve_chapter(chapters: &[Chapter], position: f64, delta: i32) -> Option<usize> {
    if delta == 0 || chapters.is_empty() {
        return None;
    }

    let mut current = chapters.len() as i64;
    for (i, chapter) in chapters.iter().enumerate() {
        if position < chapter.start {
            current = i as i64 - 1;
            break;
        }
    }

    let index = (current + delta as i64).max(0);
    if index >= chapters.len() as i64 {
        None
    } else {
        Some(index as usize)
    }
}

/// 切换流：从 `last_index` 之后开始找下一个同类型的流（循环）
///
/// - 非视频流限定在当前视频流所属的节目内
/// - 音频流要求采样率和声道数都不为 0
/// - 字幕越过最后一个时返回 `Some(-1)`（关闭字幕）
/// - 找不到其他候选时返回 None
pub fn next_stream_index(
    streams: &[StreamInfo],
    media_type: MediaType,
    last_index: i32,
    video_stream: i32,
) -> Option<i32> {
    let program = if media_type != MediaType::Video && video_stream >= 0 {
        streams
            .iter()
            .find(|s| s.index == video_stream)
            .and_then(|s| s.program)
    } else {
        None
    };

    // 候选列表：节目内的流或全部流
    let candidates: Vec<&StreamInfo> = match program {
        Some(p) => streams.iter().filter(|s| s.program == Some(p)).collect(),
        None => streams.iter().collect(),
    };
    let count = candidates.len() as i32;

    let start = candidates
        .iter()
        .position(|s| s.index == last_index)
        .map(|p| p as i32)
        .unwrap_or(-1);
    let mut cursor = start;

    loop {
        cursor += 1;
        if cursor >= count {
            if media_type == MediaType::Subtitle {
                return Some(-1);
            }
            if start == -1 {
                return None;
            }
            cursor = 0;
        }
        if cursor == start {
            return None;
        }

        let st = candidates[cursor as usize];
        if st.media_type != media_type {
            continue;
        }
        match media_type {
            MediaType::Audio if st.sample_rate != 0 && st.channels != 0 => return Some(st.index),
            MediaType::Video | MediaType::Subtitle => return Some(st.index),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let seek = SeekCoordinator::new();
        assert!(seek.request(SeekRequest::Increment(10.0)));
        assert!(!seek.request(SeekRequest::Increment(-5.0)));
        let pending = seek.begin().unwrap();
        assert_eq!(*pending, SeekRequest::Increment(10.0));
    }

    #[test]
    fn test_requests_dropped_while_processing() {
        let seek = SeekCoordinator::new();
        assert!(seek.request(SeekRequest::Percent(0.5)));
        {
            let _pending = seek.begin().unwrap();
            assert!(!seek.request(SeekRequest::Percent(0.1)));
        }
        assert!(!seek.is_requested());
        assert!(seek.begin().is_none());
        assert!(seek.request(SeekRequest::Chapter(1)));
    }

    #[test]
    fn test_lock_released_while_processing() {
        let seek = SeekCoordinator::new();
        assert!(seek.request(SeekRequest::Increment(5.0)));
        let pending = seek.begin().unwrap();
        assert!(seek.is_in_flight());
        // 处理期间锁是空闲的，只有标志挡住新请求
        assert!(seek.pending.try_lock().is_some());
        assert!(!seek.request(SeekRequest::Increment(1.0)));
        drop(pending);
        assert!(!seek.is_in_flight());
        assert!(seek.request(SeekRequest::Increment(1.0)));
    }

    #[test]
    fn test_cancel_discards_pending_request() {
        let seek = SeekCoordinator::new();
        assert!(seek.request(SeekRequest::Percent(0.3)));
        seek.cancel();
        assert!(!seek.is_requested());
        assert!(seek.begin().is_none());
        assert!(seek.request(SeekRequest::Percent(0.6)));
    }

    #[test]
    fn test_seek_window() {
        let fwd = SeekTarget::new(15_000_000, 5_000_000, false);
        assert_eq!(fwd.min, 10_000_002);
        assert_eq!(fwd.max, i64::MAX);

        let back = SeekTarget::new(5_000_000, -5_000_000, false);
        assert_eq!(back.min, i64::MIN);
        assert_eq!(back.max, 9_999_998);
    }

    #[test]
    fn test_time_increment_clamped_to_start() {
        let target = resolve_time_increment(3.0, -10.0, Some(1.0));
        assert_eq!(target.target, 1_000_000);
        assert!(!target.by_bytes);
    }

    #[test]
    fn test_byte_increment_uses_bit_rate() {
        let target = resolve_byte_increment(1000, 2.0, Some(800_000));
        assert_eq!(target.target, 1000 + 200_000);
        assert!(target.by_bytes);

        let fallback = resolve_byte_increment(-1, 1.0, None);
        assert_eq!(fallback.target, 180_000);

        let clamped = resolve_byte_increment(100, -10.0, None);
        assert_eq!(clamped.target, 0);
    }

    #[test]
    fn test_percent_includes_start_time() {
        let target = resolve_percent(0.5, 100.0, Some(2.0));
        assert_eq!(target.target, 52_000_000);
    }

    #[test]
    fn test_chapter_lookup() {
        let chapters = [
            Chapter { start: 0.0, end: 10.0 },
            Chapter { start: 10.0, end: 20.0 },
            Chapter { start: 20.0, end: 30.0 },
        ];
        assert_eq!(resolve_chapter(&chapters, 12.0, 1), Some(2));
        assert_eq!(resolve_chapter(&chapters, 12.0, -1), Some(0));
        assert_eq!(resolve_chapter(&chapters, 25.0, 1), None);
        assert_eq!(resolve_chapter(&chapters, 25.0, -5), Some(0));
        assert_eq!(resolve_chapter(&chapters, 25.0, 0), None);
        assert_eq!(resolve_chapter(&[], 25.0, 1), None);
    }

    fn stream(index: i32, media_type: MediaType) -> StreamInfo {
        let mut st = StreamInfo::new(index, media_type, "test");
        if media_type == MediaType::Audio {
            st.sample_rate = 48000;
            st.channels = 2;
        }
        st
    }

    #[test]
    fn test_cycle_audio_wraps() {
        let streams = vec![
            stream(0, MediaType::Video),
            stream(1, MediaType::Audio),
            stream(2, MediaType::Audio),
        ];
        assert_eq!(next_stream_index(&streams, MediaType::Audio, 1, 0), Some(2));
        assert_eq!(next_stream_index(&streams, MediaType::Audio, 2, 0), Some(1));
    }

    #[test]
    fn test_cycle_skips_invalid_audio_and_single_stream() {
        let mut broken = stream(2, MediaType::Audio);
        broken.channels = 0;
        let streams = vec![stream(0, MediaType::Video), stream(1, MediaType::Audio), broken];
        assert_eq!(next_stream_index(&streams, MediaType::Audio, 1, 0), None);
    }

    #[test]
    fn test_cycle_subtitle_turns_off_after_last() {
        let streams = vec![
            stream(0, MediaType::Video),
            stream(1, MediaType::Subtitle),
            stream(2, MediaType::Subtitle),
        ];
        assert_eq!(next_stream_index(&streams, MediaType::Subtitle, 1, 0), Some(2));
        assert_eq!(next_stream_index(&streams, MediaType::Subtitle, 2, 0), Some(-1));
        assert_eq!(next_stream_index(&streams, MediaType::Subtitle, -1, 0), Some(1));
    }

    #[test]
    fn test_cycle_restricted_to_video_program() {
        let mut streams = vec![
            stream(0, MediaType::Video),
            stream(1, MediaType::Audio),
            stream(2, MediaType::Audio),
            stream(3, MediaType::Audio),
        ];
        streams[0].program = Some(1);
        streams[1].program = Some(1);
        streams[2].program = Some(2);
        streams[3].program = Some(1);
        assert_eq!(next_stream_index(&streams, MediaType::Audio, 1, 0), Some(3));
        assert_eq!(next_stream_index(&streams, MediaType::Audio, 3, 0), Some(1));
    }
}
