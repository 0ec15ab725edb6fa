//! 音视频同步计算（视频跟随音频时钟）

/// 低于该阈值不做同步修正
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
/// 高于该阈值一定做同步修正
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.09;
/// 帧时长超过该值时不通过重复帧来等待音频
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
/// 距离目标时间小于该值时直接显示，不再睡眠
pub const DISPLAY_TOLERANCE: f64 = 0.0015;

/// 估计帧时长
///
/// 优先用相邻两帧 pts 之差，其次是上一次的有效估计，再其次是按帧率推算的时长；
/// 都不可用时返回 0（立即显示）。超过 `max_duration` 的值视为时间戳跳变。
pub fn vp_duration(
    max_duration: f64,
    cur_pts: f64,
    last_pts: f64,
    framerate_duration: f64,
    last_estimated: f64,
) -> f64 {
    let probably_valid = |d: f64| !d.is_nan() && d > 0.0 && d <= max_duration;

    let duration = cur_pts - last_pts;
    if probably_valid(duration) {
        duration
    } else if probably_valid(last_estimated) {
        last_estimated
    } else if probably_valid(framerate_duration) {
        framerate_duration
    } else {
        0.0
    }
}

/// 同步后的目标延迟
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetDelay {
    pub delay: f64,
    /// 修正后仍然落后超过阈值，可以丢帧
    pub too_late: bool,
}

/// 根据视频时钟与音频时钟之差修正帧延迟
///
/// 视频落后：缩短延迟（最少为 0），缩短后仍落后则标记 `too_late`；
/// 视频超前：帧时长较长时直接加上差值，否则延迟加倍（重复当前帧）。
pub fn compute_target_delay(
    delay: f64,
    video_clock: f64,
    audio_clock: f64,
    max_frame_duration: f64,
) -> TargetDelay {
    let mut result = TargetDelay {
        delay,
        too_late: false,
    };

    let diff = video_clock - audio_clock;
    if diff.is_nan() || diff.abs() > max_frame_duration {
        return result;
    }

    let sync_threshold = AV_SYNC_THRESHOLD_MIN.max(AV_SYNC_THRESHOLD_MAX.min(delay));
    if diff <= -sync_threshold {
        let remaining = delay + diff;
        if remaining <= -sync_threshold {
            result.too_late = true;
        }
        result.delay = remaining.max(0.0);
    } else if diff >= sync_threshold {
        result.delay = if delay > AV_SYNC_FRAMEDUP_THRESHOLD {
            delay + diff
        } else {
            delay * 2.0
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_ahead_slows_down() {
        let r = compute_target_delay(0.04, 10.2, 10.0, 3600.0);
        assert!(r.delay > 0.04);
        assert!((r.delay - 0.08).abs() < 1e-9);
        assert!(!r.too_late);
    }

    #[test]
    fn test_video_behind_is_too_late() {
        let r = compute_target_delay(0.04, 9.7, 10.0, 3600.0);
        assert!(r.delay <= 0.0);
        assert!(r.too_late);
    }

    #[test]
    fn test_long_frame_adds_diff_instead_of_doubling() {
        let r = compute_target_delay(0.5, 10.2, 10.0, 3600.0);
        assert!((r.delay - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_small_lag_shrinks_without_skip() {
        let r = compute_target_delay(0.04, 9.95, 10.0, 3600.0);
        assert!(!r.too_late);
        assert_eq!(r.delay, 0.0);
    }

    #[test]
    fn test_no_correction_within_threshold_or_invalid() {
        assert_eq!(compute_target_delay(0.04, 10.01, 10.0, 3600.0).delay, 0.04);
        assert_eq!(compute_target_delay(0.04, 10.0, f64::NAN, 3600.0).delay, 0.04);
        // 超过跳变上限的差值不修正
        assert_eq!(compute_target_delay(0.04, 30.0, 10.0, 10.0).delay, 0.04);
    }

    #[test]
    fn test_vp_duration_fallbacks() {
        assert!((vp_duration(10.0, 1.04, 1.0, 0.05, 0.03) - 0.04).abs() < 1e-9);
        // pts 回退，使用上次估计
        assert_eq!(vp_duration(10.0, 0.5, 1.0, 0.05, 0.03), 0.03);
        // 跳变超过上限，且没有上次估计，使用帧率
        assert_eq!(vp_duration(10.0, 100.0, 1.0, 0.05, 0.0), 0.05);
        assert_eq!(vp_duration(10.0, f64::NAN, 1.0, 0.0, f64::NAN), 0.0);
    }
}
