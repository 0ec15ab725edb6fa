use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("无法打开媒体源: {0}")]
    OpenError(String),

    #[error("没有可播放的音频或视频流")]
    NoPlayableStream,

    #[error("流索引无效: {0}")]
    InvalidStream(i32),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("重采样错误: {0}")]
    ResampleError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("线程错误: {0}")]
    WorkerError(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("已中断")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
