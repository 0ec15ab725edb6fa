use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;

/// 媒体源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL（rtsp/rtmp/http/udp ...）
    NetworkStream(String),

    /// 内置测试图案源（synthetic:// 前缀，参数见 `player::synthetic`）
    Synthetic(String),
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        if let Some(spec) = url.strip_prefix("synthetic://") {
            MediaSource::Synthetic(spec.to_string())
        } else if url.contains("://") {
            MediaSource::NetworkStream(url.to_string())
        } else {
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream(_))
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::LocalFile(path) => write!(f, "{}", path.display()),
            MediaSource::NetworkStream(url) => f.write_str(url),
            MediaSource::Synthetic(spec) => write!(f, "synthetic://{}", spec),
        }
    }
}

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
        }
    }
}

/// 不透明的负载句柄，由 Demuxer 创建、由对应的 Decoder 解释
pub type Payload = Box<dyn Any + Send>;

/// 压缩数据单元（packet）
///
/// 由 Demuxer 创建，移交给队列，最终被某个渲染线程恰好消费一次。
pub struct CompressedUnit {
    pub stream_index: i32,
    pub payload: Option<Payload>,
    /// 负载字节数
    pub size: usize,
    /// 时长（流时间基单位）
    pub duration: i64,
    /// 在源中的字节偏移，未知为 -1
    pub byte_pos: i64,
    /// 解码器 flush 标记
    pub is_flush: bool,
    /// 该流的结束标记
    pub is_eof: bool,
}

impl CompressedUnit {
    pub fn new(stream_index: i32, payload: Payload, size: usize, duration: i64) -> Self {
        Self {
            stream_index,
            payload: Some(payload),
            size,
            duration,
            byte_pos: -1,
            is_flush: false,
            is_eof: false,
        }
    }

    /// 空负载的 flush/EOF 哨兵
    pub fn null_unit(stream_index: i32, eof: bool) -> Self {
        Self {
            stream_index,
            payload: None,
            size: 0,
            duration: 0,
            byte_pos: -1,
            is_flush: true,
            is_eof: eof,
        }
    }

    pub fn with_byte_pos(mut self, byte_pos: i64) -> Self {
        self.byte_pos = byte_pos;
        self
    }

    /// 队列统计用的大小（负载 + 结构体本身）
    pub fn size_plus_sizeof(&self) -> i64 {
        (self.size + std::mem::size_of::<Self>()) as i64
    }

    /// 按类型取出负载引用
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for CompressedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedUnit")
            .field("stream_index", &self.stream_index)
            .field("size", &self.size)
            .field("duration", &self.duration)
            .field("byte_pos", &self.byte_pos)
            .field("is_flush", &self.is_flush)
            .field("is_eof", &self.is_eof)
            .finish()
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    BGRA,
    YUV420P,
    NV12,
}

/// 视频帧数据（时间单位：秒，未知为 NaN）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: f64,
    /// 按帧率估算的持续时间
    pub duration: f64,
    pub byte_pos: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// 音频帧数据（解码器原始输出，交错 f32）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: f64,
    pub duration: f64,
    pub byte_pos: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<f32>,
}

impl AudioFrame {
    /// 每声道采样数
    pub fn nb_samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }
}

/// 解码单元（frame）
#[derive(Debug, Clone)]
pub enum DecodedUnit {
    Video(VideoFrame),
    Audio(AudioFrame),
    /// 附加图片（封面）
    Attachment(VideoFrame),
    Eof,
    Unknown,
}

impl DecodedUnit {
    pub fn pts(&self) -> f64 {
        match self {
            DecodedUnit::Video(f) | DecodedUnit::Attachment(f) => f.pts,
            DecodedUnit::Audio(f) => f.pts,
            DecodedUnit::Eof | DecodedUnit::Unknown => f64::NAN,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            DecodedUnit::Video(f) | DecodedUnit::Attachment(f) => f.duration,
            DecodedUnit::Audio(f) => f.duration,
            DecodedUnit::Eof | DecodedUnit::Unknown => f64::NAN,
        }
    }

    pub fn byte_pos(&self) -> i64 {
        match self {
            DecodedUnit::Video(f) | DecodedUnit::Attachment(f) => f.byte_pos,
            DecodedUnit::Audio(f) => f.byte_pos,
            DecodedUnit::Eof | DecodedUnit::Unknown => -1,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, DecodedUnit::Eof | DecodedUnit::Unknown)
    }
}

/// 字幕矩形
#[derive(Debug, Clone)]
pub enum SubtitleRect {
    Text(String),
    Ass(String),
    /// 位图（已转换为 BGRA）
    Bitmap {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bgra: Vec<u8>,
    },
}

/// 解码后的字幕（时间：pts 为秒，显示时间为相对 pts 的毫秒）
#[derive(Debug, Clone)]
pub struct Subtitle {
    pub pts: f64,
    pub start_display_time: u32,
    pub end_display_time: u32,
    pub width: u32,
    pub height: u32,
    pub rects: Vec<SubtitleRect>,
    /// 已上传到 OSD
    pub uploaded: bool,
}

impl Subtitle {
    pub fn start_time(&self) -> f64 {
        self.pts + self.start_display_time as f64 / 1000.0
    }

    pub fn end_time(&self) -> f64 {
        self.pts + self.end_display_time as f64 / 1000.0
    }
}

/// 流描述
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: i32,
    pub media_type: MediaType,
    pub codec_name: String,
    /// 时间基（秒/单位）
    pub time_base: f64,
    pub start_time: f64,
    /// 时长（秒），未知为 NaN
    pub duration: f64,
    /// 名义帧率，未知为 0
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// 封面图片流
    pub attached_pic: bool,
    /// 所属节目，无节目为 None
    pub program: Option<u32>,
}

impl StreamInfo {
    pub fn new(index: i32, media_type: MediaType, codec_name: &str) -> Self {
        Self {
            index,
            media_type,
            codec_name: codec_name.to_string(),
            time_base: 1.0 / 1000.0,
            start_time: 0.0,
            duration: f64::NAN,
            frame_rate: 0.0,
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            attached_pic: false,
            program: None,
        }
    }

    /// 按帧率推算的帧时长
    pub fn frame_duration(&self) -> f64 {
        if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            0.0
        }
    }
}

/// 章节
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chapter {
    /// 起始时间（秒）
    pub start: f64,
    pub end: f64,
}

/// 音频参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioParams {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// 每秒字节数（f32 交错）
    pub fn bytes_per_sec(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * std::mem::size_of::<f32>()
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::new(48000, 2)
    }
}

/// 媒体信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    /// 总时长（秒），未知为 NaN
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub stream_count: usize,
    pub chapter_count: usize,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            url: String::new(),
            duration: f64::NAN,
            width: 0,
            height: 0,
            fps: 0.0,
            video_codec: "none".to_string(),
            audio_codec: "none".to_string(),
            sample_rate: 0,
            channels: 0,
            stream_count: 0,
            chapter_count: 0,
        }
    }
}

/// 播放事件（通过 channel 通知应用层）
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Opened(MediaInfo),
    OpenFailed(String),
    /// 所有活动流都已播放完毕
    EndOfStream,
    StreamSwitched {
        media_type: MediaType,
        from: i32,
        to: i32,
    },
    /// 线程在宽限期内未退出，已被放弃
    WorkerAbandoned(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_url() {
        assert_eq!(
            MediaSource::from_url("synthetic://duration=1"),
            MediaSource::Synthetic("duration=1".to_string())
        );
        assert!(MediaSource::from_url("rtsp://cam/1").is_network_stream());
        assert_eq!(
            MediaSource::from_url("/tmp/a.mkv"),
            MediaSource::LocalFile(PathBuf::from("/tmp/a.mkv"))
        );
    }

    #[test]
    fn test_null_unit_flags() {
        let unit = CompressedUnit::null_unit(3, true);
        assert!(unit.is_flush && unit.is_eof);
        assert!(unit.payload.is_none());
        assert_eq!(unit.size, 0);
        assert_eq!(unit.stream_index, 3);
    }

    #[test]
    fn test_subtitle_display_window() {
        let sub = Subtitle {
            pts: 10.0,
            start_display_time: 500,
            end_display_time: 2500,
            width: 0,
            height: 0,
            rects: vec![SubtitleRect::Text("hi".into())],
            uploaded: false,
        };
        assert!((sub.start_time() - 10.5).abs() < 1e-9);
        assert!((sub.end_time() - 12.5).abs() < 1e-9);
    }
}
