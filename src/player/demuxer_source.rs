use crate::core::{AudioParams, Chapter, CompressedUnit, MediaSource, Result, StreamInfo};
use crate::player::decoder::Decoder;
use crate::player::resample::Resampler;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Demuxer seek 标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// 目标是字节偏移而不是微秒
    pub by_bytes: bool,
}

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（本地文件、网络流、测试图案）实现这个接口。
/// 所有方法都只在 Demuxer 线程里调用。
pub trait Demuxer: Send {
    /// 读取下一个压缩数据包
    ///
    /// 返回：
    /// - Ok(Some(unit)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（可恢复，调用方稍后重试）
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>>;

    /// Seek 到 `target`（微秒或字节，见 flags），结果必须落在 `[min, max]` 内
    fn seek(&mut self, target: i64, min: i64, max: i64, flags: SeekFlags) -> Result<()>;

    /// 容器时长（秒）
    fn duration(&self) -> Option<f64>;

    fn streams(&self) -> &[StreamInfo];

    fn chapters(&self) -> &[Chapter] {
        &[]
    }

    /// 起始时间（秒）
    fn start_time(&self) -> Option<f64> {
        None
    }

    fn is_seekable(&self) -> bool {
        true
    }

    /// 时间戳不连续的格式（如 TS），按字节 seek 更可靠
    fn ts_discontinuous(&self) -> bool {
        false
    }

    fn prefers_byte_seek(&self) -> bool {
        false
    }

    /// 当前读取位置（字节），未知为 -1
    fn byte_position(&self) -> i64 {
        -1
    }

    /// 源的总字节数
    fn byte_size(&self) -> Option<i64> {
        None
    }

    /// 总码率（bit/s）
    fn bit_rate(&self) -> Option<u64> {
        None
    }

    /// 实时流（RTSP/RTP/UDP），暂停时停止读取
    fn is_realtime(&self) -> bool {
        false
    }

    /// 暂停网络读取
    fn pause(&mut self) {}

    fn play(&mut self) {}

    /// 封面流的图片包
    fn attached_picture(&mut self, _stream_index: i32) -> Option<CompressedUnit> {
        None
    }

    /// 描述信息（用于日志）
    fn description(&self) -> String;
}

/// 媒体后端：打开源并为流创建解码器/重采样器
pub trait MediaBackend: Send + Sync {
    /// 打开媒体源。`abort` 在关闭播放时置位，用于打断阻塞的 IO
    fn open_demuxer(&self, source: &MediaSource, abort: Arc<AtomicBool>) -> Result<Box<dyn Demuxer>>;

    fn create_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>>;

    /// 创建把解码输出转换成 `target` 格式的重采样器
    fn create_resampler(&self, target: AudioParams) -> Result<Box<dyn Resampler>>;
}
