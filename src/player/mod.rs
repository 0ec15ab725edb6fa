// 播放器核心模块

use std::process;
use std::thread;

pub mod worker;
pub mod packet_queue;
pub mod ring_buffer;
pub mod seek;
pub mod context;
pub mod demuxer_source; // Demuxer / 后端抽象接口
pub mod decoder;
pub mod resample;
pub mod sink;
pub mod av_sync;
pub mod demuxer_thread;
pub mod audio_thread;
pub mod video_thread;
pub mod manager;
pub mod synthetic; // 内置测试图案后端
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;
#[cfg(feature = "cpal-output")]
pub mod audio_output;

/// 日志上下文：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

pub use context::PlaybackContext;
pub use demuxer_source::{Demuxer, MediaBackend, SeekFlags};
pub use decoder::Decoder;
pub use manager::PlaybackManager;
pub use packet_queue::{PacketQueue, QueueState};
pub use ring_buffer::SampleRingBuffer;
pub use seek::{SeekCoordinator, SeekRequest};
pub use sink::{AudioCallback, AudioControls, AudioObserver, AudioSink, Outputs, VideoSink};
pub use synthetic::{null_outputs, NullAudioSink, RecordingVideoSink, SyntheticBackend};
pub use worker::{ScopedPauseGuard, WorkerHandle, WorkerOptions, WorkerState};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegBackend;
#[cfg(feature = "cpal-output")]
pub use audio_output::CpalAudioSink;
