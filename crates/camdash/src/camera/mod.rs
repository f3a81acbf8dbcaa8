//! Camera capture: frames, sinks, workers and the multi-camera manager.

pub mod buffer;
pub mod frame;
pub mod manager;
pub mod process;
pub mod settings;
pub mod sink;
pub mod source;
pub mod worker;

pub use buffer::{CaptureStats, FrameBuffer};
pub use frame::Frame;
pub use manager::{CameraHealth, Manager, ManagerError, ManagerOptions};
pub use process::{CaptureProcess, ProcessConfig, ProcessError};
pub use settings::{
    format_ladder, Camera, CaptureFormat, PixelFormat, Settings, DEFAULT_FORMAT, DEFAULT_FPS,
    DEFAULT_HEIGHT, DEFAULT_MAX_CAMERAS, DEFAULT_WIDTH,
};
pub use sink::{CameraSink, FrameQueue, FrameSink, SinkMode};
pub use source::{CaptureError, CaptureRequest, FfmpegSource, FrameSource, FrameStream};
pub use worker::{
    CaptureWorker, FramePacer, RestartWindow, WorkerError, WorkerPolicy, WorkerState,
    WorkerStatus,
};
