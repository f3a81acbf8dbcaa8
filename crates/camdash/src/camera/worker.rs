//! Per-camera capture worker.
//!
//! A worker owns at most one capture stream (and so one subprocess) at a
//! time. Its loop walks the format ladder, pumps frames into the sink, and
//! falls back to a cooldown-gated restart once every format has failed.
//! Cancellation is cooperative: the running flag is checked right before
//! every spawn and a `watch` channel wakes every wait.

use super::settings::{format_ladder, Camera, CaptureFormat, Settings};
use super::sink::FrameSink;
use super::source::{CaptureRequest, FrameSource, FrameStream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Stopped => "Stopped",
            WorkerState::Starting => "Starting",
            WorkerState::Running => "Running",
            WorkerState::Stopping => "Stopping",
            WorkerState::Restarting => "Restarting",
        };
        f.write_str(name)
    }
}

/// Timeouts and restart limits for a capture worker
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    /// Time allowed for the first frame after a spawn
    pub startup_timeout: Duration,
    /// Maximum gap between frames once streaming
    pub stale_timeout: Duration,
    /// Time between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// First cooldown after the ladder is exhausted
    pub cooldown_base: Duration,
    /// Cooldown cap
    pub cooldown_max: Duration,
    /// Restarts allowed per window
    pub max_restarts: u32,
    /// Restart accounting window
    pub restart_window: Duration,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            stale_timeout: Duration::from_millis(1500),
            stop_grace: Duration::from_secs(2),
            cooldown_base: Duration::from_secs(1),
            cooldown_max: Duration::from_secs(30),
            max_restarts: 3,
            restart_window: Duration::from_secs(30),
        }
    }
}

impl WorkerPolicy {
    /// Exponential cooldown for the n-th consecutive failed ladder pass
    pub fn cooldown(&self, failed_cycles: u32) -> Duration {
        let exponent = failed_cycles.saturating_sub(1).min(16);
        self.cooldown_base
            .saturating_mul(1u32 << exponent)
            .min(self.cooldown_max)
    }
}

/// Sliding-window restart limiter
#[derive(Debug, Clone)]
pub struct RestartWindow {
    max: u32,
    window: Duration,
    history: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max: max.max(1),
            window,
            history: VecDeque::new(),
        }
    }

    /// Record a restart at `now`, or return how long until one is allowed
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        match self.history.front() {
            Some(&oldest) if self.history.len() >= self.max as usize => {
                Err(self.window - now.saturating_duration_since(oldest))
            }
            _ => {
                self.history.push_back(now);
                Ok(())
            }
        }
    }

    /// Restarts currently counted in the window
    pub fn count(&self) -> usize {
        self.history.len()
    }
}

/// Decimates a source frame rate down to a target rate
#[derive(Debug, Default)]
pub struct FramePacer {
    credit: u64,
}

impl FramePacer {
    /// Whether the next frame should be published
    pub fn admit(&mut self, target_fps: u32, source_fps: u32) -> bool {
        if target_fps == 0 || source_fps == 0 || target_fps >= source_fps {
            self.credit = 0;
            return true;
        }
        self.credit += u64::from(target_fps);
        if self.credit >= u64::from(source_fps) {
            self.credit -= u64::from(source_fps);
            true
        } else {
            false
        }
    }
}

/// Snapshot of a worker's bookkeeping
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Index into the format ladder of the current or last attempt
    pub format_index: usize,
    pub format: Option<CaptureFormat>,
    /// Failed attempts since the last delivered frame
    pub consecutive_failures: u32,
    /// Exhausted ladder passes since the last delivered frame
    pub failed_cycles: u32,
    /// Lifetime restarts (automatic and explicit)
    pub restart_count: u64,
    pub last_restart: Option<Instant>,
    pub restarts_in_window: usize,
    /// Set while the restart limit holds the worker
    pub held_until: Option<Instant>,
    pub target_fps: u32,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Stopped,
            format_index: 0,
            format: None,
            consecutive_failures: 0,
            failed_cycles: 0,
            restart_count: 0,
            last_restart: None,
            restarts_in_window: 0,
            held_until: None,
            target_fps: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker for camera '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Camera '{camera}' reached its restart limit, retry in {retry_after:?}")]
    RestartLimit {
        camera: String,
        retry_after: Duration,
    },
}

struct Shared {
    camera: Camera,
    settings: Settings,
    policy: WorkerPolicy,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    running: AtomicBool,
    target_fps: AtomicU32,
    status: Mutex<WorkerStatus>,
    restarts: Mutex<RestartWindow>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn status(&self) -> MutexGuard<'_, WorkerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restarts(&self) -> MutexGuard<'_, RestartWindow> {
        self.restarts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        self.status().state = state;
    }

    /// Count a restart, failing when the window is full
    fn acquire_restart(&self) -> Result<(), Duration> {
        let mut restarts = self.restarts();
        restarts.try_acquire(Instant::now())?;
        let in_window = restarts.count();
        drop(restarts);

        let mut status = self.status();
        status.restart_count += 1;
        status.last_restart = Some(Instant::now());
        status.restarts_in_window = in_window;
        Ok(())
    }
}

struct ActiveLoop {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Supervises one camera's capture subprocess
pub struct CaptureWorker {
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<ActiveLoop>>,
}

impl CaptureWorker {
    pub fn new(
        camera: Camera,
        settings: Settings,
        policy: WorkerPolicy,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let restarts = RestartWindow::new(policy.max_restarts, policy.restart_window);
        let status = WorkerStatus {
            target_fps: settings.fps,
            ..WorkerStatus::default()
        };
        Self {
            shared: Arc::new(Shared {
                target_fps: AtomicU32::new(settings.fps),
                camera,
                settings,
                policy,
                source,
                sink,
                running: AtomicBool::new(false),
                status: Mutex::new(status),
                restarts: Mutex::new(restarts),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.shared.camera
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.status().clone()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.status().state
    }

    /// Start the capture loop. Must be called inside a Tokio runtime.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if !current.task.is_finished() {
                return Err(WorkerError::AlreadyRunning(self.shared.camera.name.clone()));
            }
        }

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(WorkerState::Starting);
        log::info!(
            "[Worker {}] Starting capture on {}",
            self.shared.camera.name,
            self.shared.camera.device_path.display()
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(capture_loop(self.shared.clone(), stop_rx));
        *active = Some(ActiveLoop { stop_tx, task });
        Ok(())
    }

    /// Stop the capture loop and its subprocess. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.shared.running.store(false, Ordering::Release);

        if let Some(current) = active.take() {
            self.shared.set_state(WorkerState::Stopping);
            let _ = current.stop_tx.send(true);
            if let Err(e) = current.task.await {
                log::error!(
                    "[Worker {}] Capture task failed: {}",
                    self.shared.camera.name,
                    e
                );
            }
            log::info!("[Worker {}] Stopped", self.shared.camera.name);
        }

        let mut status = self.shared.status();
        status.state = WorkerState::Stopped;
        status.held_until = None;
    }

    /// Stop and start this worker only, counted against the restart window
    pub async fn restart(&self) -> Result<(), WorkerError> {
        self.shared
            .acquire_restart()
            .map_err(|retry_after| WorkerError::RestartLimit {
                camera: self.shared.camera.name.clone(),
                retry_after,
            })?;

        log::info!("[Worker {}] Restarting", self.shared.camera.name);
        self.stop().await;
        self.start().await
    }

    /// Change the published frame rate; applies from the next frame
    pub fn set_fps(&self, fps: u32) {
        let fps = fps.max(1);
        if self.shared.target_fps.swap(fps, Ordering::AcqRel) != fps {
            self.shared.status().target_fps = fps;
            log::debug!("[Worker {}] Target FPS -> {}", self.shared.camera.name, fps);
        }
    }

    pub fn fps(&self) -> u32 {
        self.shared.target_fps.load(Ordering::Acquire)
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        // the loop sees the closed channel and tears its stream down
        self.shared.running.store(false, Ordering::Release);
    }
}

enum PumpExit {
    Stopped,
    Failed(String),
}

/// Sleep for `duration` unless a stop arrives first. Returns true on stop.
async fn wait_or_stop(
    shared: &Shared,
    duration: Duration,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    if !shared.is_running() || *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        biased;
        _ = stop_rx.changed() => true,
        _ = tokio::time::sleep(duration) => !shared.is_running(),
    }
}

async fn capture_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
    let ladder = format_ladder(shared.settings.format);
    let name = shared.camera.name.clone();
    let grace = shared.policy.stop_grace;

    'supervise: loop {
        for (index, format) in ladder.iter().copied().enumerate() {
            // Checked right before every spawn so a stop never races a new process in
            if !shared.is_running() {
                break 'supervise;
            }
            {
                let mut status = shared.status();
                status.state = WorkerState::Starting;
                status.format_index = index;
                status.format = Some(format);
            }

            let request = CaptureRequest {
                width: shared.settings.width,
                height: shared.settings.height,
                fps: shared.settings.fps,
                format,
            };

            let mut stream = match shared.source.open(&shared.camera, &request).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("[Worker {}] Failed to start {} capture: {}", name, format, e);
                    shared.status().consecutive_failures += 1;
                    continue;
                }
            };

            // A stop may have landed while we were spawning
            if !shared.is_running() {
                stream.close(grace).await;
                break 'supervise;
            }

            log::info!(
                "[Worker {}] Capturing {}x{} @ {} fps ({})",
                name,
                request.width,
                request.height,
                request.fps,
                format
            );

            let exit = pump(&shared, stream.as_mut(), &mut stop_rx).await;
            stream.close(grace).await;

            match exit {
                PumpExit::Stopped => break 'supervise,
                PumpExit::Failed(reason) => {
                    log::warn!("[Worker {}] {} capture failed: {}", name, format, reason);
                    shared.status().consecutive_failures += 1;
                }
            }
        }

        if !shared.is_running() {
            break;
        }

        // Every format failed
        let failed_cycles = {
            let mut status = shared.status();
            status.failed_cycles += 1;
            status.failed_cycles
        };

        if let Err(wait) = shared.acquire_restart() {
            log::warn!(
                "[Worker {}] Restart limit reached ({} per {:?}), holding for {:?}",
                name,
                shared.policy.max_restarts,
                shared.policy.restart_window,
                wait
            );
            {
                let mut status = shared.status();
                status.state = WorkerState::Stopped;
                status.held_until = Some(Instant::now() + wait);
            }
            if wait_or_stop(&shared, wait, &mut stop_rx).await {
                break;
            }
            shared.status().held_until = None;
            // The window has rolled over, so this cannot fail
            let _ = shared.acquire_restart();
        }

        let cooldown = shared.policy.cooldown(failed_cycles);
        shared.set_state(WorkerState::Restarting);
        log::warn!(
            "[Worker {}] All capture formats failed, retrying in {:?}",
            name,
            cooldown
        );
        if wait_or_stop(&shared, cooldown, &mut stop_rx).await {
            break;
        }
    }

    shared.set_state(WorkerState::Stopped);
    log::debug!("[Worker {}] Capture loop exited", name);
}

async fn pump(
    shared: &Shared,
    stream: &mut dyn FrameStream,
    stop_rx: &mut watch::Receiver<bool>,
) -> PumpExit {
    let mut pacer = FramePacer::default();
    let mut streaming = false;

    loop {
        let timeout = if streaming {
            shared.policy.stale_timeout
        } else {
            shared.policy.startup_timeout
        };

        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => return PumpExit::Stopped,
            next = tokio::time::timeout(timeout, stream.next_frame()) => next,
        };

        if !shared.is_running() {
            return PumpExit::Stopped;
        }

        let frame = match next {
            Err(_) => return PumpExit::Failed(format!("no frame for {:?}", timeout)),
            Ok(Err(e)) => return PumpExit::Failed(e.to_string()),
            Ok(Ok(None)) => return PumpExit::Failed("capture process exited".to_string()),
            Ok(Ok(Some(frame))) => frame,
        };

        if !streaming {
            streaming = true;
            let mut status = shared.status();
            status.state = WorkerState::Running;
            status.consecutive_failures = 0;
            status.failed_cycles = 0;
            drop(status);
            log::info!("[Worker {}] Streaming", shared.camera.name);
        }

        let target = shared.target_fps.load(Ordering::Acquire);
        if pacer.admit(target, shared.settings.fps) {
            shared.sink.publish(frame);
        } else {
            shared.sink.mark_dropped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::buffer::FrameBuffer;
    use crate::camera::frame::Frame;
    use crate::camera::source::CaptureError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Script {
        /// Spawn fails
        Fail,
        /// Never produces a frame
        Stall,
        /// Produces frames every few milliseconds until closed
        Stream,
    }

    #[derive(Default)]
    struct Probe {
        opened: Mutex<Vec<CaptureFormat>>,
        live: AtomicUsize,
    }

    struct ScriptedSource {
        scripts: Mutex<VecDeque<Script>>,
        fallback: Script,
        probe: Arc<Probe>,
    }

    impl ScriptedSource {
        fn new(scripts: &[Script], fallback: Script) -> (Arc<Self>, Arc<Probe>) {
            let probe = Arc::new(Probe::default());
            let source = Arc::new(Self {
                scripts: Mutex::new(scripts.iter().copied().collect()),
                fallback,
                probe: probe.clone(),
            });
            (source, probe)
        }
    }

    struct ScriptedStream {
        script: Script,
        probe: Arc<Probe>,
        closed: bool,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn open(
            &self,
            _camera: &Camera,
            request: &CaptureRequest,
        ) -> Result<Box<dyn FrameStream>, CaptureError> {
            self.probe.opened.lock().unwrap().push(request.format);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);
            if let Script::Fail = script {
                return Err(CaptureError::Decode("no such format".to_string()));
            }
            self.probe.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                script,
                probe: self.probe.clone(),
                closed: false,
            }))
        }
    }

    #[async_trait]
    impl FrameStream for ScriptedStream {
        async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            match self.script {
                Script::Stream => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Some(Frame::new(vec![1; 12], 2, 2)))
                }
                _ => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
            }
        }

        async fn close(&mut self, _grace: Duration) {
            if !self.closed {
                self.closed = true;
                self.probe.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn fast_policy() -> WorkerPolicy {
        WorkerPolicy {
            startup_timeout: Duration::from_millis(100),
            stale_timeout: Duration::from_millis(100),
            stop_grace: Duration::from_millis(10),
            cooldown_base: Duration::from_millis(20),
            cooldown_max: Duration::from_millis(100),
            max_restarts: 10,
            restart_window: Duration::from_secs(60),
        }
    }

    fn worker(
        source: Arc<ScriptedSource>,
        policy: WorkerPolicy,
    ) -> (CaptureWorker, Arc<FrameBuffer>) {
        let buffer = Arc::new(FrameBuffer::new());
        let settings = Settings {
            fps: 30,
            ..Settings::default()
        };
        let worker = CaptureWorker::new(
            Camera::new("usb-1", "/dev/video0"),
            settings,
            policy,
            source,
            buffer.clone(),
        );
        (worker, buffer)
    }

    async fn wait_for_frames(buffer: &FrameBuffer, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.frame_count() < count {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_restart_window() {
        let mut window = RestartWindow::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(window.try_acquire(t0).is_ok());
        assert!(window.try_acquire(t0 + Duration::from_secs(1)).is_ok());

        let wait = window.try_acquire(t0 + Duration::from_secs(2)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(8));

        // oldest entry has aged out
        assert!(window.try_acquire(t0 + Duration::from_secs(10)).is_ok());
        assert_eq!(window.count(), 2);
    }

    #[test]
    fn test_cooldown_backoff() {
        let policy = WorkerPolicy {
            cooldown_base: Duration::from_secs(1),
            cooldown_max: Duration::from_secs(10),
            ..WorkerPolicy::default()
        };
        assert_eq!(policy.cooldown(1), Duration::from_secs(1));
        assert_eq!(policy.cooldown(2), Duration::from_secs(2));
        assert_eq!(policy.cooldown(3), Duration::from_secs(4));
        assert_eq!(policy.cooldown(10), Duration::from_secs(10));
    }

    #[test]
    fn test_frame_pacer_decimates() {
        let mut pacer = FramePacer::default();
        let admitted = (0..30).filter(|_| pacer.admit(10, 30)).count();
        assert_eq!(admitted, 10);

        let mut pacer = FramePacer::default();
        assert!((0..10).all(|_| pacer.admit(30, 30)));
    }

    #[tokio::test]
    async fn test_streams_into_buffer_and_stops() {
        let (source, probe) = ScriptedSource::new(&[], Script::Stream);
        let (worker, buffer) = worker(source, fast_policy());

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 3).await;
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(matches!(worker.start().await, Err(WorkerError::AlreadyRunning(_))));

        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);

        // idempotent
        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_format_ladder_fallback() {
        let (source, probe) = ScriptedSource::new(&[Script::Fail, Script::Fail], Script::Stream);
        let (worker, buffer) = worker(source, fast_policy());

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 1).await;

        let status = worker.status();
        assert_eq!(status.format, Some(CaptureFormat::Auto));
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(
            *probe.opened.lock().unwrap(),
            vec![CaptureFormat::Mjpeg, CaptureFormat::Yuyv, CaptureFormat::Auto]
        );
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_stale_stream_advances_ladder() {
        let (source, probe) = ScriptedSource::new(&[Script::Stall], Script::Stream);
        let (worker, buffer) = worker(source, fast_policy());

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 1).await;
        assert_eq!(
            *probe.opened.lock().unwrap(),
            vec![CaptureFormat::Mjpeg, CaptureFormat::Yuyv]
        );
        worker.stop().await;
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_restarts_from_first_format() {
        let (source, probe) = ScriptedSource::new(
            &[Script::Fail, Script::Fail, Script::Fail],
            Script::Stream,
        );
        let (worker, buffer) = worker(source, fast_policy());

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 1).await;

        let opened = probe.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 4);
        assert_eq!(opened[3], CaptureFormat::Mjpeg);
        assert_eq!(worker.status().restart_count, 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_no_spawn_after_stop() {
        let (source, probe) = ScriptedSource::new(&[], Script::Fail);
        let (worker, _buffer) = worker(source, fast_policy());

        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.stop().await;

        let opened = probe.opened.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.opened.lock().unwrap().len(), opened);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let (source, _probe) = ScriptedSource::new(&[], Script::Stream);
        let policy = WorkerPolicy {
            max_restarts: 1,
            ..fast_policy()
        };
        let (worker, buffer) = worker(source, policy);

        worker.start().await.unwrap();
        worker.restart().await.unwrap();
        wait_for_frames(&buffer, 1).await;

        match worker.restart().await {
            Err(WorkerError::RestartLimit { retry_after, .. }) => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected restart limit, got {:?}", other),
        }
        // the refused restart left the worker streaming
        assert!(worker.is_running());
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_failing_camera_held_at_restart_limit() {
        let (source, probe) = ScriptedSource::new(&[], Script::Fail);
        let policy = WorkerPolicy {
            max_restarts: 1,
            ..fast_policy()
        };
        let (worker, _buffer) = worker(source, policy);

        worker.start().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.status().held_until.is_none() {
            assert!(Instant::now() < deadline, "worker never hit the restart limit");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let status = worker.status();
        assert_eq!(status.state, WorkerState::Stopped);
        assert_eq!(status.restart_count, 1);
        // two full ladder passes, nothing spawned while held
        assert_eq!(probe.opened.lock().unwrap().len(), 6);
        assert!(worker.is_running());

        let started = Instant::now();
        worker.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(worker.status().held_until.is_none());
        assert_eq!(probe.opened.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_restart_limit_hold_expires() {
        let (source, probe) = ScriptedSource::new(&[Script::Fail; 6], Script::Stream);
        let policy = WorkerPolicy {
            max_restarts: 1,
            restart_window: Duration::from_millis(300),
            ..fast_policy()
        };
        let (worker, buffer) = worker(source, policy);

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 1).await;

        let status = worker.status();
        assert_eq!(status.state, WorkerState::Running);
        assert_eq!(status.restart_count, 2);
        assert!(status.held_until.is_none());
        assert_eq!(probe.opened.lock().unwrap().len(), 7);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_set_fps_drops_surplus_frames() {
        let (source, _probe) = ScriptedSource::new(&[], Script::Stream);
        let (worker, buffer) = worker(source, fast_policy());

        worker.set_fps(10);
        assert_eq!(worker.fps(), 10);
        assert_eq!(worker.status().target_fps, 10);

        worker.start().await.unwrap();
        wait_for_frames(&buffer, 3).await;
        worker.stop().await;

        // 10 of every 30 frames are published
        assert!(buffer.dropped_count() >= buffer.frame_count());
    }
}
