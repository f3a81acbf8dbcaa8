//! CPU load and temperature sampling.

use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_CPU_LOAD_THRESHOLD: f64 = 0.75;
pub const DEFAULT_CPU_TEMP_THRESHOLD_C: f64 = 75.0;
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Scale a 1-minute load average into [0, 1] by core count.
///
/// A non-positive core count is treated as one core.
pub fn normalize_load_average(load1: f64, cpu_count: i64) -> f64 {
    let cores = cpu_count.max(1) as f64;
    (load1 / cores).clamp(0.0, 1.0)
}

/// Read a sysfs thermal zone, in degrees Celsius
pub fn read_temperature(path: &Path) -> Option<f64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: f64 = raw.trim().parse().ok()?;
    // thermal zones report millidegrees
    Some(if value.abs() >= 1000.0 {
        value / 1000.0
    } else {
        value
    })
}

/// Limits above which the host counts as stressed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressThresholds {
    /// Normalized load in [0, 1]
    pub cpu_load: f64,
    pub cpu_temp_c: f64,
}

impl Default for StressThresholds {
    fn default() -> Self {
        Self {
            cpu_load: DEFAULT_CPU_LOAD_THRESHOLD,
            cpu_temp_c: DEFAULT_CPU_TEMP_THRESHOLD_C,
        }
    }
}

impl StressThresholds {
    pub fn is_stressed(&self, sample: &Sample) -> bool {
        sample.normalized_load >= self.cpu_load
            || sample.temp_c.is_some_and(|temp| temp >= self.cpu_temp_c)
    }
}

/// One telemetry reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub load1: f64,
    pub normalized_load: f64,
    /// `None` when the host exposes no thermal zone
    pub temp_c: Option<f64>,
    pub taken_at: Instant,
}

impl Sample {
    pub fn new(normalized_load: f64, temp_c: Option<f64>) -> Self {
        Self {
            load1: normalized_load,
            normalized_load,
            temp_c,
            taken_at: Instant::now(),
        }
    }
}

/// Samples host telemetry and answers "under stress?"
pub struct Monitor {
    thermal_path: PathBuf,
    thresholds: StressThresholds,
    cpu_count: i64,
    last: Option<Sample>,
}

impl Monitor {
    pub fn new(thresholds: StressThresholds) -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);
        Self {
            thermal_path: PathBuf::from(DEFAULT_THERMAL_PATH),
            thresholds,
            cpu_count,
            last: None,
        }
    }

    pub fn with_thermal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.thermal_path = path.into();
        self
    }

    /// Read load average and temperature from the host
    pub fn sample(&mut self) -> Sample {
        let load1 = sysinfo::System::load_average().one;
        let sample = Sample {
            load1,
            normalized_load: normalize_load_average(load1, self.cpu_count),
            temp_c: read_temperature(&self.thermal_path),
            taken_at: Instant::now(),
        };
        log::trace!(
            "[Monitor] load {:.2} ({:.2} normalized), temp {:?}",
            sample.load1,
            sample.normalized_load,
            sample.temp_c
        );
        self.last = Some(sample);
        sample
    }

    /// Record an externally produced sample
    pub fn update(&mut self, sample: Sample) {
        self.last = Some(sample);
    }

    /// Stress according to the last sample; false before the first one
    pub fn is_under_stress(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|sample| self.thresholds.is_stressed(sample))
    }
}
