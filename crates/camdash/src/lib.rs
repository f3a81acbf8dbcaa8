//! camdash: multi-camera USB capture core
//!
//! Each camera gets a capture worker that drives an ffmpeg subprocess
//! through a format ladder, restarts it with backoff and publishes
//! decoded frames to a latest-frame buffer or a bounded queue. The
//! manager tracks cameras across hotplug events, and an adaptive
//! controller trades frame rate against host CPU load and temperature.
//!
//! # Example Config
//!
//! ```yaml
//! log:
//!   level: INFO
//!   file: /var/log/camdash.log
//!
//! capture:
//!   width: 640
//!   height: 480
//!   fps: 25
//!   format: mjpeg
//!
//! cameras:
//!   slot_count: 3
//!
//! performance:
//!   dynamic_fps: true
//!   min_dynamic_fps: 10
//! ```

pub mod camera;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod perf;
pub mod session;

#[cfg(all(test, unix))]
mod testing;

pub use camera::{
    Camera, CameraHealth, CaptureWorker, Frame, FrameBuffer, FrameQueue, FrameSource, Manager,
    ManagerError, ManagerOptions, Settings, SinkMode, WorkerPolicy, WorkerState,
};
pub use cli::CamdashArgs;
pub use config::{AppConfig, ConfigError};
pub use discovery::{DeviceScanner, HotplugEvent, ScannerConfig};
pub use perf::{AdaptiveConfig, AdaptiveController, ControlState, Monitor};
pub use session::{Session, SessionError};
