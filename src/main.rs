use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use myy_playcore::core::{EngineConfig, MediaSource, MediaType, PlaybackEvent};
use myy_playcore::player::{MediaBackend, NullAudioSink, Outputs, PlaybackManager, RecordingVideoSink, SyntheticBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "myy_playcore")]
#[command(author, version, about = "无界面播放引擎演示：播放一个媒体源并输出进度日志")]
struct Cli {
    /// 媒体源（文件路径、网络 URL 或 synthetic://...）
    #[arg(default_value = "synthetic://duration=5&subs=1&chapters=3")]
    url: String,

    /// 引擎配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 最长播放时间（秒）
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// 播放 1 秒后相对 seek（秒）
    #[arg(long)]
    seek: Option<f64>,

    /// 播放中切换一次音频流
    #[arg(long)]
    cycle_audio: bool,

    /// 不使用声卡
    #[arg(long)]
    null_audio: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn backend_for(source: &MediaSource) -> Result<Arc<dyn MediaBackend>> {
    match source {
        MediaSource::Synthetic(_) => Ok(Arc::new(SyntheticBackend::new())),
        #[cfg(feature = "ffmpeg")]
        _ => Ok(Arc::new(myy_playcore::player::FfmpegBackend::new().context("FFmpeg 初始化失败")?)),
        #[cfg(not(feature = "ffmpeg"))]
        _ => anyhow::bail!("播放 {} 需要启用 ffmpeg feature", source),
    }
}

fn outputs(null_audio: bool) -> (Outputs, Arc<RecordingVideoSink>) {
    let video = Arc::new(RecordingVideoSink::new());
    #[cfg(feature = "cpal-output")]
    let audio = if null_audio {
        NullAudioSink::factory()
    } else {
        myy_playcore::player::CpalAudioSink::factory()
    };
    #[cfg(not(feature = "cpal-output"))]
    let audio = {
        if !null_audio {
            info!("未启用 cpal-output feature，使用空音频设备");
        }
        NullAudioSink::factory()
    };
    let outputs = Outputs {
        audio,
        video: video.clone(),
        observers: Vec::new(),
    };
    (outputs, video)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    info!("🎬 myy_playcore 启动");

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("无法加载配置文件: {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let source = MediaSource::from_url(&cli.url);
    let backend = backend_for(&source)?;
    let (outputs, video) = outputs(cli.null_audio);

    let mut manager = PlaybackManager::new(config, backend, outputs)?;
    let events = manager.events();
    manager.open(source)?;

    let started = Instant::now();
    let limit = Duration::from_secs_f64(cli.seconds.max(0.0));
    let mut seek_pending = cli.seek;
    let mut cycle_pending = cli.cycle_audio;
    let mut last_report = Instant::now();

    'playback: while started.elapsed() < limit {
        while let Ok(event) = events.try_recv() {
            match event {
                PlaybackEvent::Opened(info) => info!("✅ 已打开: {:?}", info),
                PlaybackEvent::OpenFailed(reason) => {
                    warn!("❌ 打开失败: {}", reason);
                    break 'playback;
                }
                PlaybackEvent::EndOfStream => {
                    info!("📄 播放结束");
                    break 'playback;
                }
                PlaybackEvent::StreamSwitched { media_type, from, to } => {
                    info!("🔀 {} 流切换: #{} -> #{}", media_type.as_str(), from, to)
                }
                PlaybackEvent::WorkerAbandoned(name) => warn!("⚠️  线程被放弃: {}", name),
            }
        }

        if started.elapsed() >= Duration::from_secs(1) {
            if let Some(increment) = seek_pending.take() {
                info!("⏩ seek {:+.1}s: {}", increment, manager.seek_by_increment(increment));
            }
            if cycle_pending {
                cycle_pending = false;
                manager.cycle_stream(MediaType::Audio);
            }
        }

        if last_report.elapsed() >= Duration::from_millis(500) {
            let (position, duration) = manager.playback_position();
            info!(
                "⏱️  {:.2}s / {:.2}s, 已显示 {} 帧, 字幕 {} 次",
                position,
                duration,
                video.frames_shown(),
                video.overlays_shown()
            );
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(20));
    }

    manager.close();
    info!("👋 退出");
    Ok(())
}
