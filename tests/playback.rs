use crossbeam_channel::Receiver;
use myy_playcore::core::{EngineConfig, MediaType, PlaybackEvent};
use myy_playcore::player::{
    null_outputs, NullAudioSink, Outputs, PlaybackManager, RecordingVideoSink, SyntheticBackend,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn manager_with(outputs: Outputs) -> PlaybackManager {
    PlaybackManager::new(EngineConfig::default(), Arc::new(SyntheticBackend::new()), outputs).unwrap()
}

fn open(url: &str) -> (PlaybackManager, Receiver<PlaybackEvent>, Arc<RecordingVideoSink>) {
    let (outputs, video) = null_outputs();
    let mut manager = manager_with(outputs);
    let events = manager.events();
    manager.open_url(url).unwrap();
    (manager, events, video)
}

/// 等待满足条件的事件，返回期间收到的所有事件
fn wait_for_event(
    events: &Receiver<PlaybackEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&PlaybackEvent) -> bool,
) -> Option<Vec<PlaybackEvent>> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) => {
                let matched = pred(&event);
                seen.push(event);
                if matched {
                    return Some(seen);
                }
            }
            Err(_) => break,
        }
    }
    None
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn is_eof(event: &PlaybackEvent) -> bool {
    matches!(event, PlaybackEvent::EndOfStream)
}

#[test]
fn test_eof_notified_exactly_once() {
    let (manager, events, video) = open("synthetic://duration=1");

    let seen = wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no EOF event");
    assert!(matches!(seen.first(), Some(PlaybackEvent::Opened(_))));
    assert!(manager.eof_reached());
    assert!(video.frames_shown() > 0);

    thread::sleep(Duration::from_millis(500));
    assert_eq!(events.try_iter().filter(is_eof).count(), 0);
    assert!(manager.is_active());
}

#[test]
fn test_opened_event_carries_media_info() {
    let (manager, events, _video) = open("synthetic://duration=2&chapters=2&subs=1&width=32&height=18");
    let seen = wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");
    let Some(PlaybackEvent::Opened(info)) = seen.last() else {
        panic!("expected Opened");
    };
    assert_eq!(info.duration, 2.0);
    assert_eq!((info.width, info.height), (32, 18));
    assert_eq!(info.stream_count, 3);
    assert_eq!(info.chapter_count, 2);
    assert_eq!(info.sample_rate, 48000);
    assert_eq!(manager.duration(), 2.0);
    assert!(manager.media_info().is_some());
}

#[test]
fn test_back_to_back_seeks_only_first_applied() {
    let (manager, events, _video) = open("synthetic://duration=30");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");
    thread::sleep(Duration::from_millis(300));

    assert!(manager.seek_by_increment(10.0));
    assert!(!manager.seek_by_increment(-5.0));

    assert!(wait_until(Duration::from_secs(5), || manager.playback_position().0 >= 9.0));
    thread::sleep(Duration::from_millis(200));
    let (position, _) = manager.playback_position();
    assert!((9.0..13.0).contains(&position), "position = {}", position);
}

#[test]
fn test_small_seek_increment_ignored() {
    let (manager, _events, _video) = open("synthetic://duration=5");
    assert!(!manager.seek_by_increment(0.05));
    assert!(!manager.seek_by_increment(-0.09));
}

#[test]
fn test_seek_rearms_eof() {
    let (manager, events, _video) = open("synthetic://duration=1&video=0");
    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no first EOF");

    assert!(manager.seek_by_percent(0.0));
    assert!(wait_until(Duration::from_secs(2), || !manager.eof_reached()));
    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no second EOF");
}

#[test]
fn test_pause_freezes_position() {
    let (manager, events, _video) = open("synthetic://duration=20");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");
    assert!(wait_until(Duration::from_secs(3), || manager.playback_position().0 > 0.3));

    assert!(manager.pause());
    assert!(!manager.is_playing());
    thread::sleep(Duration::from_millis(100));
    let frozen = manager.playback_position().0;
    thread::sleep(Duration::from_millis(400));
    let later = manager.playback_position().0;
    assert!((later - frozen).abs() < 0.05, "{} vs {}", frozen, later);

    assert!(manager.resume());
    assert!(manager.is_playing());
    assert!(wait_until(Duration::from_secs(2), || manager.playback_position().0 > frozen + 0.2));
}

#[test]
fn test_audio_device_failure_keeps_video_playing() {
    let video = Arc::new(RecordingVideoSink::new());
    let outputs = Outputs {
        audio: NullAudioSink::failing_factory(),
        video: video.clone(),
        observers: Vec::new(),
    };
    let mut manager = manager_with(outputs);
    let events = manager.events();
    manager.open_url("synthetic://duration=1").unwrap();

    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no EOF event");
    assert!(video.frames_shown() > 0);
}

#[test]
fn test_open_failure_reported() {
    let (manager, events, _video) = open("synthetic://duration=oops");
    let seen = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, PlaybackEvent::OpenFailed(_))
    });
    assert!(seen.is_some());
    assert!(wait_until(Duration::from_secs(2), || !manager.is_active()));
}

#[test]
fn test_no_playable_stream() {
    let (_manager, events, _video) = open("synthetic://audio=0&video=0&subs=1");
    let seen = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, PlaybackEvent::OpenFailed(_))
    });
    assert!(seen.is_some());
}

#[test]
fn test_cycle_subtitles_turns_them_off() {
    let (manager, events, _video) = open("synthetic://duration=5&subs=1");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");

    assert!(manager.cycle_stream(MediaType::Subtitle));
    let seen = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, PlaybackEvent::StreamSwitched { .. })
    })
    .expect("no switch");
    let Some(PlaybackEvent::StreamSwitched { media_type, from, to }) = seen.last() else {
        panic!("expected StreamSwitched");
    };
    assert_eq!(*media_type, MediaType::Subtitle);
    assert_eq!(*from, 2);
    assert_eq!(*to, -1);
}

#[test]
fn test_cycle_audio_track() {
    let (manager, events, _video) = open("synthetic://duration=5&audio_tracks=2");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");

    assert!(manager.cycle_stream(MediaType::Audio));
    let seen = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, PlaybackEvent::StreamSwitched { .. })
    })
    .expect("no switch");
    assert!(matches!(
        seen.last(),
        Some(PlaybackEvent::StreamSwitched { media_type: MediaType::Audio, from: 0, to: 1 })
    ));
}

#[test]
fn test_subtitles_reach_overlay() {
    let (_manager, events, video) = open("synthetic://duration=3&subs=1");
    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no EOF event");
    assert!(video.overlays_shown() >= 1);
}

#[test]
fn test_cover_art_displayed_once() {
    let (_manager, events, video) = open("synthetic://duration=1&cover=1");
    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no EOF event");
    assert!(video.frames_shown() >= 1);
}

#[test]
fn test_close_stops_everything() {
    let (mut manager, events, video) = open("synthetic://duration=10");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");
    assert!(wait_until(Duration::from_secs(3), || video.frames_shown() > 0));

    manager.close();
    assert!(!manager.is_active());
    assert!(!video.is_opened());
    assert!(manager.playback_position().0.is_nan());
    assert!(!events.try_iter().any(|e| matches!(e, PlaybackEvent::WorkerAbandoned(_))));
}

#[test]
fn test_volume_and_mute_survive_reopen() {
    let (mut manager, _events, _video) = open("synthetic://duration=1");
    manager.set_volume(0.25);
    assert!(manager.toggle_mute());
    manager.open_url("synthetic://duration=1").unwrap();
    assert_eq!(manager.volume(), 0.25);
    assert!(manager.is_muted());
    assert!(!manager.toggle_mute());
}

#[test]
fn test_control_stays_responsive_during_long_frame_interval() {
    // 25 秒一帧：视频线程大部分时间在等下一帧
    let (mut manager, events, video) = open("synthetic://duration=120&fps=0.04&audio=0");
    wait_for_event(&events, Duration::from_secs(5), |e| matches!(e, PlaybackEvent::Opened(_)))
        .expect("not opened");
    assert!(wait_until(Duration::from_secs(3), || video.frames_shown() > 0));
    thread::sleep(Duration::from_millis(200));

    let quick = Duration::from_millis(500);

    let started = Instant::now();
    assert!(manager.pause());
    assert!(started.elapsed() < quick, "pause took {:?}", started.elapsed());

    let started = Instant::now();
    assert!(manager.resume());
    assert!(started.elapsed() < quick, "resume took {:?}", started.elapsed());

    assert!(manager.seek_by_increment(30.0));
    assert!(wait_until(Duration::from_secs(2), || manager.playback_position().0 >= 20.0));

    let started = Instant::now();
    manager.close();
    assert!(started.elapsed() < quick, "close took {:?}", started.elapsed());
    assert!(!events.try_iter().any(|e| matches!(e, PlaybackEvent::WorkerAbandoned(_))));
}

#[test]
fn test_audio_resampled_to_device_rate() {
    let video = Arc::new(RecordingVideoSink::new());
    let outputs = Outputs {
        audio: NullAudioSink::fixed_rate_factory(48000),
        video: video.clone(),
        observers: Vec::new(),
    };
    let mut manager = manager_with(outputs);
    let events = manager.events();
    manager.open_url("synthetic://duration=1&rate=44100").unwrap();

    wait_for_event(&events, Duration::from_secs(10), is_eof).expect("no EOF event");
    assert!(manager.playback_position().0 > 0.5);
}
