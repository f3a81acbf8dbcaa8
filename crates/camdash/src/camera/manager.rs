//! Multi-camera manager.
//!
//! Owns one sink and one capture worker per camera. Every worker is
//! supervised on its own, so restarting one camera never touches another.
//! The camera list sits behind a single `RwLock` whose guard is never held
//! across an `.await`: workers are cloned out first and driven afterwards.

use super::buffer::FrameBuffer;
use super::settings::{Camera, Settings};
use super::sink::{CameraSink, FrameQueue, SinkMode};
use super::source::FrameSource;
use super::worker::{CaptureWorker, WorkerError, WorkerPolicy, WorkerState, WorkerStatus};
use crate::discovery::{DeviceScanner, HotplugEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Default delay between worker starts
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(500);

/// Manager construction options
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Frame delivery mode, fixed for the manager's lifetime
    pub sink_mode: SinkMode,
    /// Delay between consecutive worker starts
    pub stagger: Duration,
    /// Policy handed to every worker
    pub policy: WorkerPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            sink_mode: SinkMode::Buffer,
            stagger: DEFAULT_STAGGER,
            policy: WorkerPolicy::default(),
        }
    }
}

/// Errors returned by the manager
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Camera manager not initialized")]
    NotInitialized,

    #[error("Camera {0} not found")]
    CameraNotFound(String),

    #[error("Camera index {index} out of range ({count} cameras)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Camera {camera}: {source}")]
    Worker {
        camera: String,
        #[source]
        source: WorkerError,
    },
}

/// Per-camera health snapshot
#[derive(Debug, Clone)]
pub struct CameraHealth {
    pub camera: Camera,
    pub status: WorkerStatus,
    pub frames: u64,
    pub dropped: u64,
    pub last_frame_age: Option<Duration>,
    /// Streamed before, but nothing within the stale timeout
    pub stale: bool,
}

struct Slot {
    camera: Camera,
    sink: CameraSink,
    worker: Arc<CaptureWorker>,
}

#[derive(Default)]
struct State {
    initialized: bool,
    started: bool,
    /// Bumped whenever the worker set is torn down
    generation: u64,
    slots: Vec<Slot>,
    /// Sinks of detached cameras, reused when the same device comes back
    parked: HashMap<String, CameraSink>,
}

impl State {
    fn slot(&self, device_id: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.camera.device_id == device_id)
    }
}

/// Manages capture workers for all connected cameras
pub struct Manager {
    settings: Settings,
    options: ManagerOptions,
    source: Arc<dyn FrameSource>,
    scanner: Arc<Mutex<DeviceScanner>>,
    target_fps: AtomicU32,
    state: RwLock<State>,
}

impl Manager {
    pub fn new(
        settings: Settings,
        options: ManagerOptions,
        source: Arc<dyn FrameSource>,
        scanner: DeviceScanner,
    ) -> Self {
        let settings = settings.with_defaults();
        Self {
            target_fps: AtomicU32::new(settings.fps),
            settings,
            options,
            source,
            scanner: Arc::new(Mutex::new(scanner)),
            state: RwLock::new(State::default()),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Run `f` against the scanner on the blocking pool; sysfs walks and
    /// holder cleanup block on filesystem I/O
    async fn with_scanner<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut DeviceScanner) -> T + Send + 'static,
        T: Send + 'static,
    {
        let scanner = self.scanner.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut scanner = scanner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut scanner)
        })
        .await;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("[Manager] Device scan failed: {}", e);
                None
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_buffer_mode(&self) -> bool {
        matches!(self.options.sink_mode, SinkMode::Buffer)
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    fn build_slot(&self, camera: Camera, sink: CameraSink) -> Slot {
        let worker = CaptureWorker::new(
            camera.clone(),
            self.settings.clone(),
            self.options.policy.clone(),
            self.source.clone(),
            sink.as_sink(),
        );
        worker.set_fps(self.fps());
        Slot {
            camera,
            sink,
            worker: Arc::new(worker),
        }
    }

    /// Stop existing workers, discover cameras and build their workers.
    ///
    /// Workers are not started. Returns the number of cameras found.
    pub async fn initialize(&self) -> usize {
        log::info!("[Manager] Stopping existing workers...");
        self.stop().await;

        log::info!("[Manager] Discovering cameras...");
        let limit = self.settings.max_cameras;
        let cameras = self
            .with_scanner(move |scanner| scanner.discover(limit))
            .await
            .unwrap_or_default();
        log::info!("[Manager] Found {} cameras", cameras.len());

        let slots: Vec<Slot> = cameras
            .into_iter()
            .map(|camera| {
                log::info!(
                    "[Manager] Creating worker for camera {} ({}) [buffer mode: {}]",
                    camera.device_id,
                    camera.device_path.display(),
                    self.is_buffer_mode()
                );
                let sink = CameraSink::for_mode(self.options.sink_mode);
                self.build_slot(camera, sink)
            })
            .collect();
        let count = slots.len();

        let mut state = self.state_mut();
        state.generation += 1;
        state.slots = slots;
        state.parked.clear();
        state.initialized = true;
        state.started = false;
        drop(state);

        log::info!("[Manager] Initialization complete");
        count
    }

    /// Start every worker in discovery order, `stagger` apart.
    ///
    /// Stops at the first worker that fails, leaving earlier ones running.
    /// A concurrent `stop` or `initialize` cuts the sequence short.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let (generation, workers) = {
            let mut state = self.state_mut();
            if !state.initialized {
                return Err(ManagerError::NotInitialized);
            }
            state.started = true;
            let workers: Vec<Arc<CaptureWorker>> =
                state.slots.iter().map(|slot| slot.worker.clone()).collect();
            (state.generation, workers)
        };

        log::info!(
            "[Manager] Starting {} workers ({:?} apart)",
            workers.len(),
            self.options.stagger
        );

        for (i, worker) in workers.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.stagger).await;
            }
            if self.generation() != generation {
                log::info!("[Manager] Start interrupted by stop");
                return Ok(());
            }

            worker.start().await.map_err(|source| ManagerError::Worker {
                camera: worker.camera().device_id.clone(),
                source,
            })?;

            // A stop that ran between the check and the start missed this worker
            if self.generation() != generation {
                worker.stop().await;
                return Ok(());
            }
        }

        Ok(())
    }

    /// Stop every worker concurrently. No-op when not initialized.
    pub async fn stop(&self) {
        let slots = {
            let mut state = self.state_mut();
            if !state.initialized {
                return;
            }
            state.generation += 1;
            state.initialized = false;
            state.started = false;
            state.parked.clear();
            std::mem::take(&mut state.slots)
        };

        log::info!("[Manager] Stopping {} workers", slots.len());
        futures::future::join_all(slots.iter().map(|slot| slot.worker.stop())).await;
        log::info!("[Manager] All workers stopped");
    }

    /// Restart one camera by device id
    pub async fn restart_camera(&self, device_id: &str) -> Result<(), ManagerError> {
        let worker = self
            .state()
            .slot(device_id)
            .map(|slot| slot.worker.clone())
            .ok_or_else(|| ManagerError::CameraNotFound(device_id.to_string()))?;

        log::info!("[Manager] Restarting camera {}", device_id);
        worker.restart().await.map_err(|source| ManagerError::Worker {
            camera: device_id.to_string(),
            source,
        })?;

        // A stop or detach that ran meanwhile discarded this worker
        let current = self
            .state()
            .slot(device_id)
            .is_some_and(|slot| Arc::ptr_eq(&slot.worker, &worker));
        if !current {
            worker.stop().await;
            return Err(ManagerError::CameraNotFound(device_id.to_string()));
        }
        Ok(())
    }

    /// Restart one camera by its position in discovery order
    pub async fn restart_camera_by_index(&self, index: usize) -> Result<(), ManagerError> {
        let device_id = {
            let state = self.state();
            state
                .slots
                .get(index)
                .map(|slot| slot.camera.device_id.clone())
                .ok_or(ManagerError::IndexOutOfRange {
                    index,
                    count: state.slots.len(),
                })?
        };
        self.restart_camera(&device_id).await
    }

    /// Tracked cameras in discovery order
    pub fn cameras(&self) -> Vec<Camera> {
        self.state()
            .slots
            .iter()
            .map(|slot| slot.camera.clone())
            .collect()
    }

    /// Latest-frame buffer of a camera (buffer mode only)
    pub fn frame_buffer(&self, device_id: &str) -> Option<Arc<FrameBuffer>> {
        self.state().slot(device_id)?.sink.buffer()
    }

    /// Frame queue of a camera (queue mode only)
    pub fn frame_queue(&self, device_id: &str) -> Option<Arc<FrameQueue>> {
        self.state().slot(device_id)?.sink.queue()
    }

    pub fn worker_status(&self, device_id: &str) -> Option<WorkerStatus> {
        Some(self.state().slot(device_id)?.worker.status())
    }

    pub fn camera_health(&self) -> Vec<CameraHealth> {
        let stale_after = self.options.policy.stale_timeout;
        self.state()
            .slots
            .iter()
            .map(|slot| {
                let sink = slot.sink.as_sink();
                let last_frame_age = sink.last_frame_time().map(|t| t.elapsed());
                let status = slot.worker.status();
                let stale = status.state != WorkerState::Stopped
                    && last_frame_age.is_some_and(|age| age > stale_after);
                CameraHealth {
                    camera: slot.camera.clone(),
                    status,
                    frames: sink.frames_published(),
                    dropped: slot.sink.dropped_count(),
                    last_frame_age,
                    stale,
                }
            })
            .collect()
    }

    /// Share of running cameras that have gone stale, 0.0 when none run
    pub fn stale_ratio(&self) -> f64 {
        let health = self.camera_health();
        let running = health
            .iter()
            .filter(|h| h.status.state != WorkerState::Stopped)
            .count();
        if running == 0 {
            return 0.0;
        }
        health.iter().filter(|h| h.stale).count() as f64 / running as f64
    }

    /// Target FPS applied to every worker
    pub fn fps(&self) -> u32 {
        self.target_fps.load(Ordering::Acquire)
    }

    pub fn set_fps(&self, fps: u32) {
        let fps = fps.max(1);
        self.target_fps.store(fps, Ordering::Release);
        for slot in self.state().slots.iter() {
            slot.worker.set_fps(fps);
        }
    }

    /// Apply one hotplug event
    pub async fn handle_event(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Detached(camera) => self.detach(camera).await,
            HotplugEvent::Attached(camera) => self.attach(camera).await,
        }
    }

    async fn detach(&self, camera: Camera) {
        let slot = {
            let mut state = self.state_mut();
            let Some(index) = state.slots.iter().position(|slot| {
                slot.camera.device_id == camera.device_id
                    && slot.camera.device_path == camera.device_path
            }) else {
                return;
            };
            let slot = state.slots.remove(index);
            state
                .parked
                .insert(slot.camera.device_id.clone(), slot.sink.clone());
            slot
        };

        log::info!("[Manager] Camera {} disconnected", slot.camera);
        slot.worker.stop().await;
    }

    async fn attach(&self, camera: Camera) {
        let (worker, generation, replaced) = {
            let mut state = self.state_mut();
            if !state.initialized {
                return;
            }

            let mut replaced = None;
            if let Some(index) = state
                .slots
                .iter()
                .position(|slot| slot.camera.device_id == camera.device_id)
            {
                if state.slots[index].camera.device_path == camera.device_path {
                    return;
                }
                // Moved to a new node without a detach in between
                let old = state.slots.remove(index);
                state.parked.insert(old.camera.device_id.clone(), old.sink);
                replaced = Some(old.worker);
            }

            if state.slots.len() >= self.settings.max_cameras {
                log::warn!(
                    "[Manager] Ignoring {}: already tracking {} cameras",
                    camera,
                    state.slots.len()
                );
                return;
            }

            let sink = match state.parked.remove(&camera.device_id) {
                Some(sink) => {
                    log::info!("[Manager] Camera {} reconnected", camera);
                    sink
                }
                None => {
                    log::info!("[Manager] New camera {}", camera);
                    CameraSink::for_mode(self.options.sink_mode)
                }
            };

            let slot = self.build_slot(camera, sink);
            let worker = slot.worker.clone();
            state.slots.push(slot);
            let generation = state.generation;
            (state.started.then_some(worker), generation, replaced)
        };

        if let Some(old) = replaced {
            old.stop().await;
        }

        let Some(worker) = worker else {
            return;
        };
        if let Err(e) = worker.start().await {
            log::error!("[Manager] Failed to start {}: {}", worker.camera(), e);
            return;
        }
        if self.generation() != generation {
            worker.stop().await;
        }
    }

    /// Rescan devices and apply the changes. Returns the number of events.
    pub async fn poll_hotplug(&self) -> usize {
        let events = self
            .with_scanner(|scanner| scanner.scan())
            .await
            .unwrap_or_default();
        let count = events.len();
        for event in events {
            self.handle_event(event).await;
        }
        count
    }

    /// When the most recent frame of any camera arrived
    pub fn last_activity(&self) -> Option<Instant> {
        self.state()
            .slots
            .iter()
            .filter_map(|slot| slot.sink.as_sink().last_frame_time())
            .max()
    }
}
