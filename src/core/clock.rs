use parking_lot::RwLock;
use std::sync::OnceLock;
use std::time::Instant;

static TIME_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// 单调时钟（秒），所有时钟与帧计时器共用同一个原点
pub fn now_secs() -> f64 {
    TIME_ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// 默认最大修正容差（秒）
pub const DEFAULT_MAX_TOLERANCE: f64 = 2.0;

/// 播放时钟 - 以墙上时间为锚点，估计“当前正在呈现的时间戳”
///
/// 暂停时 `get()` 恒等于 `pts`；播放时返回
/// `pts + clamp(now - last_updated, 0, tolerance) * speed`，
/// 调用方卡顿时时钟不会一下子跳得太远。
///
/// 读多写少：其他线程（UI、另一个渲染线程）只读，拥有者线程写。
pub struct PresentationClock {
    inner: RwLock<ClockState>,
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: f64,          // 时钟基准，未知为 NaN
    last_updated: f64, // 锚点墙上时间
    speed: f64,
    max_correction_tolerance: f64,
    paused: bool,
}

impl ClockState {
    fn value_at(&self, time: f64) -> f64 {
        if self.paused {
            return self.pts;
        }
        if self.last_updated.is_nan() {
            return f64::NAN;
        }
        let time_diff = (time - self.last_updated)
            .max(0.0)
            .min(self.max_correction_tolerance);
        self.pts + time_diff - time_diff * (1.0 - self.speed)
    }
}

impl PresentationClock {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_MAX_TOLERANCE)
    }

    pub fn with_tolerance(max_correction_tolerance: f64) -> Self {
        Self {
            inner: RwLock::new(ClockState {
                pts: f64::NAN,
                last_updated: f64::NAN,
                speed: 1.0,
                max_correction_tolerance,
                paused: false,
            }),
        }
    }

    /// 当前时钟值（秒），未知为 NaN
    pub fn get(&self) -> f64 {
        self.inner.read().value_at(now_secs())
    }

    /// 以当前时刻为锚点设置时钟
    pub fn set(&self, pts: f64) {
        self.set_at(pts, now_secs());
    }

    /// 以指定时刻为锚点设置时钟
    pub fn set_at(&self, pts: f64, time: f64) {
        let mut inner = self.inner.write();
        inner.pts = pts;
        inner.last_updated = time;
    }

    /// 重置为未知
    pub fn reset(&self) {
        self.set_at(f64::NAN, 0.0);
    }

    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.write();
        if inner.paused != paused {
            let now = now_secs();
            let current = inner.value_at(now);
            inner.pts = current;
            inner.last_updated = now;
            inner.paused = paused;
        }
    }

    /// 设置播放速率（先按旧速率重新锚定，避免跳变）
    pub fn set_speed(&self, speed: f64) {
        let mut inner = self.inner.write();
        let now = now_secs();
        let current = inner.value_at(now);
        inner.pts = current;
        inner.last_updated = now;
        inner.speed = speed;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.read().paused
    }
}

impl Default for PresentationClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unset_clock_is_nan() {
        let clock = PresentationClock::new();
        assert!(clock.get().is_nan());
        clock.set(1.0);
        clock.reset();
        assert!(clock.get().is_nan());
    }

    #[test]
    fn test_clock_advances_while_playing() {
        let clock = PresentationClock::new();
        clock.set(5.0);
        let first = clock.get();
        thread::sleep(Duration::from_millis(20));
        let second = clock.get();
        assert!(first >= 5.0);
        assert!(second >= first);
        assert!(second - 5.0 >= 0.015);
    }

    #[test]
    fn test_paused_clock_is_constant() {
        let clock = PresentationClock::new();
        clock.set(3.0);
        clock.set_paused(true);
        let frozen = clock.get();
        thread::sleep(Duration::from_millis(15));
        assert_eq!(clock.get(), frozen);
        assert_eq!(clock.get(), frozen);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_elapsed_is_clamped_by_tolerance() {
        let clock = PresentationClock::with_tolerance(0.5);
        let now = now_secs();
        clock.set_at(10.0, now - 100.0);
        let value = clock.get();
        assert!((value - 10.5).abs() < 1e-6, "value = {}", value);
    }

    #[test]
    fn test_future_anchor_does_not_go_backwards() {
        let clock = PresentationClock::new();
        clock.set_at(7.0, now_secs() + 50.0);
        assert_eq!(clock.get(), 7.0);
    }

    #[test]
    fn test_speed_scales_elapsed() {
        let clock = PresentationClock::new();
        clock.set_at(0.0, now_secs() - 1.0);
        clock.set_speed(0.0);
        let rebased = clock.get();
        assert!(rebased >= 1.0 && rebased < 1.1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.get(), rebased);
    }

    #[test]
    fn test_unpause_rebases_without_jump() {
        let clock = PresentationClock::new();
        clock.set(2.0);
        clock.set_paused(true);
        let frozen = clock.get();
        thread::sleep(Duration::from_millis(30));
        clock.set_paused(false);
        let resumed = clock.get();
        assert!(resumed >= frozen);
        assert!(resumed - frozen < 0.02);
    }
}
