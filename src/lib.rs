//! 播放引擎核心：一个 Demuxer 线程加音频/视频渲染线程，
//! 通过有界队列、可控线程和展示时钟完成音画同步播放。

pub mod core;
pub mod player;
