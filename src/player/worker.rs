//! 可控工作线程
//!
//! 所有工作线程（Demuxer / 音频 / 视频）都由同一个通用执行器驱动：
//! 执行器负责 暂停/恢复/单步/flush/退出 状态机，具体的循环体由 [`WorkerBody`] 提供。
//!
//! 暂停请求是同步的：调用方修改期望状态后阻塞在确认通道上，
//! 直到工作线程在安全点确认，或者超时。

use crate::core::{EngineConfig, PlayerError, Result};
use crate::player::log_ctx;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Paused,
    StepPending,
    QuitRequested,
}

/// 循环体单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// 工作线程的循环体
///
/// 回调 `on_flush` / `on_step` / `on_pause_changed` / `is_eof` 都在持有控制锁时调用，
/// 不要在里面做阻塞 IO。
pub trait WorkerBody: Send + 'static {
    /// 清空内部状态（Seek 之后）
    fn on_flush(&mut self) {}

    /// 暂停状态下前进一步
    fn on_step(&mut self) {}

    fn on_pause_changed(&mut self, _paused: bool) {}

    /// 本线程是否已播放到末尾
    fn is_eof(&self) -> bool {
        false
    }

    fn iterate(&mut self) -> LoopControl;

    /// 线程退出前的清理，任何退出路径都会调用
    fn on_exit(&mut self) {}
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    step_request: bool,
    flush_request: bool,
    quit_requested: bool,
    eof: bool,
}

/// 调用方与工作线程共享的控制块
struct WorkerControl {
    name: &'static str,
    flags: Mutex<ControlFlags>,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
    ack_timeout: Duration,
    interrupt: Option<Arc<AtomicBool>>,
    alive: AtomicBool,
}

/// 等待确认时的轮询间隔
const ACK_POLL: Duration = Duration::from_millis(20);

impl WorkerControl {
    fn new(name: &'static str, ack_timeout: Duration, interrupt: Option<Arc<AtomicBool>>) -> Self {
        let (ack_tx, ack_rx) = bounded(1);
        Self {
            name,
            flags: Mutex::new(ControlFlags::default()),
            ack_tx,
            ack_rx,
            ack_timeout,
            interrupt,
            alive: AtomicBool::new(true),
        }
    }

    fn acknowledge(&self) {
        // 容量为 1，调用方还没取走上一次确认时直接丢弃
        let _ = self.ack_tx.try_send(());
    }

    fn wait_ack(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ack_rx.recv_timeout(ACK_POLL).is_ok() {
                return true;
            }
            if !self.alive.load(Ordering::Acquire) {
                debug!("{} 线程 {} 已退出，不再等待确认", log_ctx(), self.name);
                return false;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} ⚠️  线程 {} 未在 {:?} 内确认请求",
                    log_ctx(),
                    self.name,
                    timeout
                );
                return false;
            }
        }
    }

    /// 设置期望的暂停状态，阻塞直到线程确认或超时。
    /// 状态未变化或已请求退出时返回 false。
    pub fn try_set_pause(&self, pause: bool) -> bool {
        {
            let mut flags = self.flags.lock();
            if flags.quit_requested {
                return false;
            }
            if flags.paused == pause {
                debug!(
                    "{} 线程 {} 已经是{}状态",
                    log_ctx(),
                    self.name,
                    if pause { "暂停" } else { "运行" }
                );
                return false;
            }
            while self.ack_rx.try_recv().is_ok() {}
            flags.paused = pause;
        }
        self.wait_ack(self.ack_timeout)
    }

    pub fn request_exit(&self) {
        self.flags.lock().quit_requested = true;
        if let Some(ref interrupt) = self.interrupt {
            interrupt.store(true, Ordering::Release);
        }
    }

    pub fn request_step(&self) {
        self.flags.lock().step_request = true;
    }

    pub fn request_flush(&self) {
        self.flags.lock().flush_request = true;
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    /// 线程报告的 EOF；有未处理的 flush 请求时不算（seek 之后的旧状态）
    pub fn eof_reached(&self) -> bool {
        let flags = self.flags.lock();
        flags.eof && (!flags.flush_request || !self.alive.load(Ordering::Acquire))
    }

    pub fn state(&self) -> WorkerState {
        let flags = self.flags.lock();
        if flags.quit_requested {
            WorkerState::QuitRequested
        } else if flags.step_request {
            WorkerState::StepPending
        } else if flags.paused {
            WorkerState::Paused
        } else {
            WorkerState::Running
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 启动参数
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub ack_timeout: Duration,
    pub exit_grace: Duration,
    /// 启动后做一次 暂停→恢复 往返，确认循环已经跑起来
    pub ensure_start: bool,
    /// 请求退出时同时置位（用于打断阻塞的 IO）
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl WorkerOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            exit_grace: config.exit_grace(),
            ensure_start: true,
            interrupt: None,
        }
    }

    pub fn ensure_start(mut self, ensure: bool) -> Self {
        self.ensure_start = ensure;
        self
    }

    pub fn interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }
}

/// 工作线程句柄，drop 时请求退出并等待结束
pub struct WorkerHandle {
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
    exit_grace: Duration,
}

impl WorkerHandle {
    pub fn spawn<B: WorkerBody>(name: &'static str, body: B, options: WorkerOptions) -> Result<Self> {
        let control = Arc::new(WorkerControl::new(
            name,
            options.ack_timeout,
            options.interrupt.clone(),
        ));

        let thread_control = control.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(body, thread_control))
            .map_err(|e| PlayerError::WorkerError(format!("无法启动线程 {}: {}", name, e)))?;

        let handle = Self {
            control,
            thread: Some(thread),
            exit_grace: options.exit_grace,
        };

        if options.ensure_start {
            handle.ensure_started(options.ack_timeout);
        }

        Ok(handle)
    }

    fn ensure_started(&self, timeout: Duration) {
        let started = {
            let ctl = &self.control;
            let mut ok = true;
            for pause in [true, false] {
                {
                    let mut flags = ctl.flags.lock();
                    while ctl.ack_rx.try_recv().is_ok() {}
                    flags.paused = pause;
                }
                ok &= ctl.wait_ack(timeout);
            }
            ok
        };
        if !started {
            error!("{} ❌ 线程 {} 启动确认失败", log_ctx(), self.control.name);
        }
    }

    pub fn name(&self) -> &'static str {
        self.control.name
    }

    pub fn try_set_pause(&self, pause: bool) -> bool {
        self.control.try_set_pause(pause)
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn request_exit(&self) {
        self.control.request_exit();
    }

    pub fn request_step(&self) {
        self.control.request_step();
    }

    pub fn request_flush(&self) {
        self.control.request_flush();
    }

    pub fn eof_reached(&self) -> bool {
        self.control.eof_reached()
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// 请求退出并在宽限期内等待线程结束。
    ///
    /// Rust 线程无法被强制终止：超时后线程会被分离（放弃），返回 false。
    pub fn join_or_abandon(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        self.control.request_exit();
        let deadline = Instant::now() + self.exit_grace;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                error!("{} ❌ 线程 {} 异常退出（panic）", log_ctx(), self.control.name);
            }
            debug!("{} ✅ 线程 {} 已结束", log_ctx(), self.control.name);
            true
        } else {
            error!(
                "{} ❌ 线程 {} 未能在 {:?} 内正常退出，已放弃该线程",
                log_ctx(),
                self.control.name,
                self.exit_grace
            );
            false
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.join_or_abandon();
    }
}

fn run_loop<B: WorkerBody>(mut body: B, control: Arc<WorkerControl>) {
    info!("{} ▶️  线程 {} 启动", log_ctx(), control.name);
    let mut local_paused = false;

    loop {
        {
            let mut flags = control.flags.lock();
            if flags.quit_requested {
                control.acknowledge();
                break;
            }

            if flags.flush_request {
                flags.flush_request = false;
                body.on_flush();
            }

            if flags.step_request {
                flags.step_request = false;
                body.on_step();
            }

            flags.eof = body.is_eof();

            if flags.paused != local_paused {
                local_paused = flags.paused;
                body.on_pause_changed(local_paused);
                control.acknowledge();
            }
        }

        if body.iterate() == LoopControl::Exit {
            break;
        }
    }

    body.on_exit();
    control.flags.lock().eof = body.is_eof();
    control.alive.store(false, Ordering::Release);
    info!("{} 🛑 线程 {} 退出", log_ctx(), control.name);
}

/// 作用域暂停守卫
///
/// 构造时记录线程的暂停状态，未暂停则强制暂停；
/// 析构时请求 flush，并且：若是本守卫强制暂停的则恢复播放，否则请求单步，
/// 让已暂停的画面刷新到新位置。任何退出路径（包括提前返回）都会执行。
pub struct ScopedPauseGuard<'a> {
    worker: Option<&'a WorkerHandle>,
    holds_lock: bool,
    was_paused: bool,
}

impl<'a> ScopedPauseGuard<'a> {
    pub fn new(worker: Option<&'a WorkerHandle>) -> Self {
        let mut guard = Self {
            worker,
            holds_lock: false,
            was_paused: false,
        };

        let Some(worker) = worker else {
            debug!("{} ScopedPauseGuard: 没有线程", log_ctx());
            return guard;
        };

        if !worker.is_running() {
            warn!("{} ScopedPauseGuard: 线程 {} 未运行", log_ctx(), worker.name());
            guard.worker = None;
            return guard;
        }

        guard.was_paused = worker.is_paused();
        guard.holds_lock = guard.was_paused;
        if !guard.was_paused {
            guard.holds_lock = worker.try_set_pause(true);
            if !guard.holds_lock {
                warn!("{} ScopedPauseGuard: 无法暂停线程 {}", log_ctx(), worker.name());
            }
        }

        guard
    }

    pub fn holds_lock(&self) -> bool {
        self.holds_lock
    }
}

impl Drop for ScopedPauseGuard<'_> {
    fn drop(&mut self) {
        let Some(worker) = self.worker else {
            return;
        };
        if !self.holds_lock {
            return;
        }

        worker.request_flush();
        if !self.was_paused {
            if !worker.try_set_pause(false) {
                warn!("{} ScopedPauseGuard: 无法恢复线程 {}", log_ctx(), worker.name());
            }
        } else {
            worker.request_step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        iterations: AtomicUsize,
        flushes: AtomicUsize,
        steps: AtomicUsize,
        pauses: AtomicUsize,
        exited: AtomicBool,
    }

    struct CountingBody {
        counters: Arc<Counters>,
        paused: bool,
    }

    impl WorkerBody for CountingBody {
        fn on_flush(&mut self) {
            self.counters.flushes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_step(&mut self) {
            self.counters.steps.fetch_add(1, Ordering::SeqCst);
        }

        fn on_pause_changed(&mut self, paused: bool) {
            self.paused = paused;
            if paused {
                self.counters.pauses.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn iterate(&mut self) -> LoopControl {
            if !self.paused {
                self.counters.iterations.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(1));
            LoopControl::Continue
        }

        fn on_exit(&mut self) {
            self.counters.exited.store(true, Ordering::SeqCst);
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            ack_timeout: Duration::from_millis(500),
            exit_grace: Duration::from_millis(500),
            ensure_start: true,
            interrupt: None,
        }
    }

    fn spawn_counting() -> (WorkerHandle, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let body = CountingBody {
            counters: counters.clone(),
            paused: false,
        };
        (WorkerHandle::spawn("test-worker", body, options()).unwrap(), counters)
    }

    #[test]
    fn test_pause_is_acknowledged() {
        let (worker, counters) = spawn_counting();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(worker.try_set_pause(true));
        assert_eq!(worker.state(), WorkerState::Paused);
        let frozen = counters.iterations.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counters.iterations.load(Ordering::SeqCst), frozen);
        assert!(worker.try_set_pause(false));
        thread::sleep(Duration::from_millis(20));
        assert!(counters.iterations.load(Ordering::SeqCst) > frozen);
    }

    #[test]
    fn test_redundant_pause_request_returns_false() {
        let (worker, _) = spawn_counting();
        assert!(!worker.try_set_pause(false));
        assert!(worker.try_set_pause(true));
        assert!(!worker.try_set_pause(true));
    }

    #[test]
    fn test_exit_runs_cleanup() {
        let (mut worker, counters) = spawn_counting();
        assert!(worker.join_or_abandon());
        assert!(counters.exited.load(Ordering::SeqCst));
        assert!(!worker.is_running());
        assert!(!worker.try_set_pause(true));
    }

    #[test]
    fn test_guard_on_running_worker_flushes_and_resumes() {
        let (worker, counters) = spawn_counting();
        {
            let guard = ScopedPauseGuard::new(Some(&worker));
            assert!(guard.holds_lock());
            assert!(worker.is_paused());
        }
        assert!(!worker.is_paused());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counters.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.steps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_on_paused_worker_requests_step() {
        let (worker, counters) = spawn_counting();
        assert!(worker.try_set_pause(true));
        {
            let guard = ScopedPauseGuard::new(Some(&worker));
            assert!(guard.holds_lock());
        }
        assert!(worker.is_paused());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counters.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.steps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_without_worker_is_noop() {
        let guard = ScopedPauseGuard::new(None);
        assert!(!guard.holds_lock());
    }

    struct StuckBody {
        release: Arc<AtomicBool>,
    }

    impl WorkerBody for StuckBody {
        fn iterate(&mut self) -> LoopControl {
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
            LoopControl::Exit
        }
    }

    #[test]
    fn test_unresponsive_worker_is_abandoned() {
        let release = Arc::new(AtomicBool::new(false));
        let body = StuckBody {
            release: release.clone(),
        };
        let mut opts = options().ensure_start(false);
        opts.exit_grace = Duration::from_millis(30);
        let mut worker = WorkerHandle::spawn("stuck-worker", body, opts).unwrap();
        assert!(!worker.join_or_abandon());
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_exit_sets_interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let body = CountingBody {
            counters,
            paused: false,
        };
        let mut worker =
            WorkerHandle::spawn("interrupt-worker", body, options().interrupt(flag.clone())).unwrap();
        worker.request_exit();
        assert!(flag.load(Ordering::SeqCst));
        assert!(worker.join_or_abandon());
    }
}
