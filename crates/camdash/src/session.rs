//! Capture session: wires the manager, hotplug scanning, the adaptive
//! controller and health reporting together and tears them down on shutdown.

use crate::camera::{CameraHealth, FfmpegSource, FrameSource, Manager, ManagerError};
use crate::config::AppConfig;
use crate::discovery::DeviceScanner;
use crate::perf::{AdaptiveController, Monitor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Camera manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A running multi-camera capture session
pub struct Session {
    config: AppConfig,
    manager: Arc<Manager>,
    controller: Arc<AdaptiveController>,
}

impl Session {
    pub fn new(config: AppConfig, source: Arc<dyn FrameSource>) -> Self {
        let manager = Manager::new(
            config.settings(),
            config.manager_options(),
            source,
            DeviceScanner::new(config.scanner_config()),
        );
        let controller = AdaptiveController::new(config.adaptive_config());
        Self {
            config,
            manager: Arc::new(manager),
            controller: Arc::new(controller),
        }
    }

    /// Session capturing through the configured ffmpeg binary
    pub fn with_ffmpeg(config: AppConfig) -> Self {
        let source = Arc::new(FfmpegSource::new(config.capture.ffmpeg.clone()));
        Self::new(config, source)
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn controller(&self) -> &Arc<AdaptiveController> {
        &self.controller
    }

    /// Start capturing and run until `shutdown_rx` fires, then stop everything
    pub async fn run(&self, shutdown_rx: watch::Receiver<()>) -> Result<(), SessionError> {
        let count = self.manager.initialize().await;
        if count == 0 {
            log::warn!("[Session] No cameras found, waiting for hotplug");
        }

        self.manager.set_fps(self.controller.current_fps());
        if let Err(e) = self.manager.start().await {
            self.manager.stop().await;
            return Err(e.into());
        }
        log::info!(
            "[Session] Capturing from {} cameras at {} fps ({} FPS control)",
            count,
            self.controller.current_fps(),
            if self.controller.is_dynamic() {
                "dynamic"
            } else {
                "fixed"
            }
        );

        let hotplug = tokio::spawn(hotplug_loop(
            self.manager.clone(),
            self.config.rescan_interval(),
            shutdown_rx.clone(),
        ));

        let monitor = Monitor::new(self.config.stress_thresholds())
            .with_thermal_path(self.config.performance.thermal_path.clone());
        let control = tokio::spawn(control_loop(
            self.manager.clone(),
            self.controller.clone(),
            monitor,
            shutdown_rx.clone(),
        ));

        let health = self.config.health_interval().map(|period| {
            tokio::spawn(health_loop(
                self.manager.clone(),
                self.controller.clone(),
                period,
                shutdown_rx.clone(),
            ))
        });

        let joined = async {
            hotplug.await?;
            control.await?;
            if let Some(health) = health {
                health.await?;
            }
            Ok::<(), tokio::task::JoinError>(())
        }
        .await;

        log::info!("[Session] Shutting down");
        self.manager.stop().await;
        joined.map_err(SessionError::from)
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn hotplug_loop(
    manager: Arc<Manager>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {
                let events = manager.poll_hotplug().await;
                if events > 0 {
                    log::info!(
                        "[Hotplug] Applied {} events, {} cameras tracked",
                        events,
                        manager.cameras().len()
                    );
                }
            }
        }
    }
    log::debug!("[Hotplug] Loop exited");
}

async fn control_loop(
    manager: Arc<Manager>,
    controller: Arc<AdaptiveController>,
    mut monitor: Monitor,
    mut shutdown_rx: watch::Receiver<()>,
) {
    if !controller.is_dynamic() {
        let _ = shutdown_rx.changed().await;
        return;
    }

    let stale_threshold = controller.config().stale_ratio_threshold;
    let mut interval = ticker(controller.config().sample_interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {
                monitor.sample();
                let stale_ratio = manager.stale_ratio();
                let stressed = monitor.is_under_stress()
                    || (stale_threshold > 0.0 && stale_ratio >= stale_threshold);
                if let Some(fps) = controller.evaluate(stressed) {
                    manager.set_fps(fps);
                }
            }
        }
    }
    log::debug!("[Adaptive] Loop exited");
}

/// Frame-count deltas between health reports
#[derive(Default)]
struct RateTracker {
    last: HashMap<String, (u64, Instant)>,
}

impl RateTracker {
    fn rate(&mut self, device_id: &str, frames: u64, now: Instant) -> f64 {
        let rate = match self.last.get(device_id) {
            Some((prev_frames, prev_at)) if frames >= *prev_frames => {
                let secs = now.saturating_duration_since(*prev_at).as_secs_f64();
                if secs > 0.0 {
                    (frames - prev_frames) as f64 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        self.last.insert(device_id.to_string(), (frames, now));
        rate
    }
}

/// One health line for a camera
pub fn format_health(health: &CameraHealth, fps: f64) -> String {
    let mut line = format!(
        "{}: {} {:.1} fps, {} frames, {} dropped, {} restarts",
        health.camera.name,
        health.status.state,
        fps,
        health.frames,
        health.dropped,
        health.status.restart_count
    );
    if health.stale {
        line.push_str(", STALE");
    }
    if health.status.held_until.is_some() {
        line.push_str(", restart limit");
    }
    line
}

async fn health_loop(
    manager: Arc<Manager>,
    controller: Arc<AdaptiveController>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut interval = ticker(period);
    let mut rates = RateTracker::default();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {
                let now = Instant::now();
                for health in manager.camera_health() {
                    let fps = rates.rate(&health.camera.device_id, health.frames, now);
                    log::info!("[Health] {}", format_health(&health, fps));
                }
                log::info!(
                    "[Health] controller {} at {} fps (sweet spot {})",
                    controller.state(),
                    controller.current_fps(),
                    controller.sweet_spot_fps()
                );
            }
        }
    }
}
