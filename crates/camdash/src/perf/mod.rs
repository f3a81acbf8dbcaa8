//! Host telemetry and adaptive frame rate control.

pub mod adaptive;
pub mod monitor;

pub use adaptive::{AdaptiveConfig, AdaptiveController, ControlState, MAX_FPS, MIN_FPS};
pub use monitor::{normalize_load_average, read_temperature, Monitor, Sample, StressThresholds};
