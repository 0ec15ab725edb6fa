use crate::core::{CompressedUnit, DecodedUnit, Result, StreamInfo, Subtitle};
use std::collections::VecDeque;

/// 解码器抽象接口
///
/// 每个解码器实例只属于一个线程（音频/视频解码器归渲染线程，字幕解码器由
/// `PlaybackContext` 的字幕锁保护），所以这里只要求 `Send`。
///
/// 哨兵包的约定：
/// - `is_flush && !is_eof`：清空解码器内部状态
/// - `is_eof`：排空剩余的帧后进入 EOF 状态（`eof_state()` 返回 true）
pub trait Decoder: Send {
    /// 按流参数初始化
    fn init(&mut self, stream: &StreamInfo) -> Result<()>;

    /// 解码音频包，输出追加到 `out`
    fn decode_audio(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()>;

    /// 解码视频包，输出追加到 `out`
    fn decode_video(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()>;

    /// 解码字幕包
    fn decode_subtitle(&mut self, unit: &CompressedUnit, out: &mut VecDeque<Subtitle>) -> Result<()>;

    /// 清空内部缓冲并退出 EOF 状态
    fn flush(&mut self);

    /// 已收到 EOF 哨兵并且没有剩余输出
    fn eof_state(&self) -> bool;
}
