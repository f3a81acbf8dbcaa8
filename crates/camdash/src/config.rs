//! YAML application configuration.
//!
//! Every field is optional. Out-of-range values are clamped on load rather
//! than rejected, and `validate` reports settings that are legal but likely
//! to overload a USB 2.0 bus or a small CPU.

use crate::camera::{ManagerOptions, PixelFormat, Settings, SinkMode, WorkerPolicy};
use crate::discovery::ScannerConfig;
use crate::perf::{AdaptiveConfig, StressThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CAMDASH_CONFIG";
/// Environment variable overriding `log.file`
pub const LOG_FILE_ENV: &str = "CAMDASH_LOG_FILE";
/// Config file used when neither the CLI nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Practical USB 2.0 isochronous throughput, bytes per second
const USB2_BANDWIDTH_BYTES: f64 = 35.0 * 1024.0 * 1024.0;
const HIGH_RESOLUTION_PIXELS: u64 = 480_000;
const HIGH_CAPTURE_FPS: u32 = 25;

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    pub level: String,
    /// Rotating log file; stdout only when unset
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: u32,
    pub stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: None,
            max_bytes: 5 * 1024 * 1024,
            backup_count: 3,
            stdout: true,
        }
    }
}

/// Capture section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// ffmpeg executable
    pub ffmpeg: String,
    pub sink: SinkMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 25,
            format: PixelFormat::Mjpeg,
            ffmpeg: "ffmpeg".to_string(),
            sink: SinkMode::Buffer,
        }
    }
}

/// Camera discovery and supervision section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamerasConfig {
    pub slot_count: usize,
    pub kill_device_holders: bool,
    pub dev_dir: PathBuf,
    pub sysfs_dir: PathBuf,
    pub rescan_interval_sec: f64,
    pub stagger_ms: u64,
    pub stale_frame_timeout_sec: f64,
    pub startup_timeout_sec: f64,
    pub stop_grace_sec: f64,
    pub restart_cooldown_sec: f64,
    pub max_restart_cooldown_sec: f64,
    pub max_restarts_per_window: u32,
    pub restart_window_sec: f64,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            kill_device_holders: true,
            dev_dir: PathBuf::from("/dev"),
            sysfs_dir: PathBuf::from("/sys/class/video4linux"),
            rescan_interval_sec: 5.0,
            stagger_ms: 500,
            stale_frame_timeout_sec: 1.5,
            startup_timeout_sec: 5.0,
            stop_grace_sec: 2.0,
            restart_cooldown_sec: 1.0,
            max_restart_cooldown_sec: 30.0,
            max_restarts_per_window: 3,
            restart_window_sec: 30.0,
        }
    }
}

/// Adaptive FPS section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub dynamic_fps: bool,
    pub min_dynamic_fps: u32,
    pub cpu_load_threshold: f64,
    pub cpu_temp_threshold_c: f64,
    pub thermal_path: PathBuf,
    pub sample_interval_sec: f64,
    pub probe_step: u32,
    pub recover_hold_count: u32,
    pub stress_hold_count: u32,
    pub reprobe_interval: u32,
    pub stale_ratio_threshold: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        let adaptive = AdaptiveConfig::default();
        Self {
            dynamic_fps: adaptive.dynamic,
            min_dynamic_fps: adaptive.min_dynamic_fps,
            cpu_load_threshold: adaptive.thresholds.cpu_load,
            cpu_temp_threshold_c: adaptive.thresholds.cpu_temp_c,
            thermal_path: PathBuf::from(crate::perf::monitor::DEFAULT_THERMAL_PATH),
            sample_interval_sec: adaptive.sample_interval.as_secs_f64(),
            probe_step: adaptive.probe_step,
            recover_hold_count: adaptive.recover_hold_count,
            stress_hold_count: adaptive.stress_hold_count,
            reprobe_interval: adaptive.reprobe_interval,
            stale_ratio_threshold: adaptive.stale_ratio_threshold,
        }
    }
}

/// Health reporting section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between health lines; 0 disables them
    pub log_interval_sec: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            log_interval_sec: 30.0,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub capture: CaptureConfig,
    pub cameras: CamerasConfig,
    pub performance: PerformanceConfig,
    pub health: HealthConfig,
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // an empty document is a valid, all-defaults config
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config.clamped())
    }

    /// Resolve the config path, read it if present and apply env overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let path = config_path(cli_path, env);

        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            log::debug!("[Config] {} not found, using defaults", path.display());
            Self::default()
        };
        Ok((config.with_env_overrides(env), path))
    }

    /// Apply environment overrides from `lookup`
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(file) = lookup(LOG_FILE_ENV).filter(|v| !v.is_empty()) {
            self.log.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Pull every value into its supported range
    pub fn clamped(mut self) -> Self {
        let perf = &mut self.performance;
        perf.cpu_load_threshold = perf.cpu_load_threshold.clamp(0.1, 1.0);
        perf.cpu_temp_threshold_c = perf.cpu_temp_threshold_c.clamp(40.0, 100.0);
        perf.stale_ratio_threshold = perf.stale_ratio_threshold.clamp(0.0, 1.0);
        perf.sample_interval_sec = perf.sample_interval_sec.max(0.1);
        perf.probe_step = perf.probe_step.max(1);

        let capture = &mut self.capture;
        capture.width = capture.width.clamp(160, 1920);
        capture.height = capture.height.clamp(120, 1080);
        capture.fps = capture.fps.clamp(1, 60);

        let cameras = &mut self.cameras;
        cameras.slot_count = cameras.slot_count.clamp(1, 8);
        cameras.max_restarts_per_window = cameras.max_restarts_per_window.max(1);
        cameras.rescan_interval_sec = cameras.rescan_interval_sec.max(0.5);
        cameras.stale_frame_timeout_sec = cameras.stale_frame_timeout_sec.max(0.1);

        self
    }

    /// Check for settings that will struggle on the target hardware.
    ///
    /// Returns `false` when the estimated USB bandwidth is exceeded.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut ok = true;
        let mut warnings = Vec::new();
        let capture = &self.capture;

        let pixels = u64::from(capture.width) * u64::from(capture.height);
        if pixels > HIGH_RESOLUTION_PIXELS {
            warnings.push(format!(
                "High resolution {}x{} ({} pixels) may overload the CPU",
                capture.width, capture.height, pixels
            ));
        }

        if capture.fps > HIGH_CAPTURE_FPS {
            warnings.push(format!(
                "Capture FPS {} is above {} and may cause frame drops",
                capture.fps, HIGH_CAPTURE_FPS
            ));
        }

        // MJPEG compresses to roughly half a byte per pixel; YUYV is 2
        let bytes_per_pixel = match capture.format {
            PixelFormat::Mjpeg => 0.5,
            PixelFormat::Yuyv => 2.0,
        };
        let bandwidth = pixels as f64
            * bytes_per_pixel
            * capture.fps as f64
            * self.cameras.slot_count as f64;
        if bandwidth > USB2_BANDWIDTH_BYTES {
            ok = false;
            warnings.push(format!(
                "Estimated USB bandwidth {:.1} MB/s exceeds {:.0} MB/s",
                bandwidth / (1024.0 * 1024.0),
                USB2_BANDWIDTH_BYTES / (1024.0 * 1024.0)
            ));
        }

        if self.performance.dynamic_fps && self.performance.min_dynamic_fps > capture.fps {
            warnings.push(format!(
                "MinDynamicFPS {} is above capture FPS {}",
                self.performance.min_dynamic_fps, capture.fps
            ));
        }

        (ok, warnings)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            width: self.capture.width,
            height: self.capture.height,
            fps: self.capture.fps,
            format: self.capture.format,
            max_cameras: self.cameras.slot_count,
        }
    }

    pub fn worker_policy(&self) -> WorkerPolicy {
        let cameras = &self.cameras;
        WorkerPolicy {
            startup_timeout: secs(cameras.startup_timeout_sec),
            stale_timeout: secs(cameras.stale_frame_timeout_sec),
            stop_grace: secs(cameras.stop_grace_sec),
            cooldown_base: secs(cameras.restart_cooldown_sec),
            cooldown_max: secs(cameras.max_restart_cooldown_sec),
            max_restarts: cameras.max_restarts_per_window,
            restart_window: secs(cameras.restart_window_sec),
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            sink_mode: self.capture.sink,
            stagger: Duration::from_millis(self.cameras.stagger_ms),
            policy: self.worker_policy(),
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            dev_dir: self.cameras.dev_dir.clone(),
            sysfs_dir: self.cameras.sysfs_dir.clone(),
            max_cameras: self.cameras.slot_count,
            kill_device_holders: self.cameras.kill_device_holders,
        }
    }

    pub fn stress_thresholds(&self) -> StressThresholds {
        StressThresholds {
            cpu_load: self.performance.cpu_load_threshold,
            cpu_temp_c: self.performance.cpu_temp_threshold_c,
        }
    }

    pub fn adaptive_config(&self) -> AdaptiveConfig {
        let perf = &self.performance;
        AdaptiveConfig {
            dynamic: perf.dynamic_fps,
            capture_fps: self.capture.fps,
            min_dynamic_fps: perf.min_dynamic_fps,
            thresholds: self.stress_thresholds(),
            probe_step: perf.probe_step,
            recover_hold_count: perf.recover_hold_count,
            stress_hold_count: perf.stress_hold_count,
            reprobe_interval: perf.reprobe_interval,
            sample_interval: secs(perf.sample_interval_sec),
            stale_ratio_threshold: perf.stale_ratio_threshold,
        }
    }

    pub fn rescan_interval(&self) -> Duration {
        secs(self.cameras.rescan_interval_sec)
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health.log_interval_sec > 0.0).then(|| secs(self.health.log_interval_sec))
    }
}

/// Config file to read: CLI path, then `$CAMDASH_CONFIG`, then `./config.yaml`
pub fn config_path(cli_path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    cli_path
        .map(Path::to_path_buf)
        .or_else(|| lookup(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}
