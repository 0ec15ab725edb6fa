use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 引擎参数
///
/// 所有字段都有默认值，JSON 中只需要写要覆盖的项：
/// ```json
/// { "queue_capacity": 800, "min_queued_seconds": 3.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 每个 packet 队列的固定容量
    pub queue_capacity: usize,
    /// 音视频队列合计字节上限
    pub max_queue_bytes: i64,
    /// 每个活动流至少缓冲的 packet 数
    pub min_queued_units: i32,
    /// 每个活动流至少缓冲的时长（秒）
    pub min_queued_seconds: f64,
    /// 等待线程确认暂停/恢复的超时
    pub worker_ack_timeout_ms: u64,
    /// 请求退出后等待线程结束的宽限期
    pub worker_exit_grace_ms: u64,
    /// 时钟最大修正容差（秒）
    pub clock_max_tolerance: f64,
    /// 音频环形缓冲区至少容纳的时长（秒）
    pub audio_buffer_seconds: f64,
    /// 播放时希望保持的已解码视频帧数
    pub preferred_buffered_frames: usize,
    /// 初始音量 0.0 - 1.0
    pub default_volume: f32,
    /// 空闲轮询间隔
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1500,
            max_queue_bytes: 50 * 1024 * 1024,
            min_queued_units: 100,
            min_queued_seconds: 2.0,
            worker_ack_timeout_ms: 4900,
            worker_exit_grace_ms: 4900,
            clock_max_tolerance: 2.0,
            audio_buffer_seconds: 0.5,
            preferred_buffered_frames: 2,
            default_volume: 1.0,
            poll_interval_ms: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PlayerError::InvalidConfig("queue_capacity 必须大于 0".into()));
        }
        if self.max_queue_bytes <= 0 {
            return Err(PlayerError::InvalidConfig("max_queue_bytes 必须大于 0".into()));
        }
        if !(self.audio_buffer_seconds > 0.0) {
            return Err(PlayerError::InvalidConfig(
                "audio_buffer_seconds 必须大于 0".into(),
            ));
        }
        if !(self.clock_max_tolerance > 0.0) {
            return Err(PlayerError::InvalidConfig(
                "clock_max_tolerance 必须大于 0".into(),
            ));
        }
        if self.preferred_buffered_frames == 0 {
            return Err(PlayerError::InvalidConfig(
                "preferred_buffered_frames 至少为 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(PlayerError::InvalidConfig("default_volume 超出 0.0 - 1.0".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ack_timeout_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.worker_exit_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "queue_capacity": 64 }"#).unwrap();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.max_queue_bytes, 50 * 1024 * 1024);
        assert_eq!(config.min_queued_units, 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "queue_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidConfig(_)));
        assert!(EngineConfig::from_json_str("{ not json").is_err());
    }
}
