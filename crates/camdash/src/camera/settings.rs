use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 15;
pub const DEFAULT_FORMAT: PixelFormat = PixelFormat::Mjpeg;
pub const DEFAULT_MAX_CAMERAS: usize = 3;

/// Pixel format requested from the camera
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Motion JPEG, the only format most USB 2.0 cameras can push at 640x480+
    #[default]
    Mjpeg,
    /// Uncompressed YUYV 4:2:2
    Yuyv,
}

/// One rung of the format ladder tried by a capture worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Mjpeg,
    Yuyv,
    /// Let the driver pick
    Auto,
}

impl CaptureFormat {
    /// Value passed to ffmpeg's `-input_format`, `None` for auto
    pub fn input_format(&self) -> Option<&'static str> {
        match self {
            CaptureFormat::Mjpeg => Some("mjpeg"),
            CaptureFormat::Yuyv => Some("yuyv422"),
            CaptureFormat::Auto => None,
        }
    }
}

impl std::fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureFormat::Mjpeg => write!(f, "mjpeg"),
            CaptureFormat::Yuyv => write!(f, "yuyv"),
            CaptureFormat::Auto => write!(f, "auto"),
        }
    }
}

impl From<PixelFormat> for CaptureFormat {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Mjpeg => CaptureFormat::Mjpeg,
            PixelFormat::Yuyv => CaptureFormat::Yuyv,
        }
    }
}

/// Ordered formats to try: the configured one, the other raw format, then auto.
pub fn format_ladder(primary: PixelFormat) -> [CaptureFormat; 3] {
    match primary {
        PixelFormat::Mjpeg => [CaptureFormat::Mjpeg, CaptureFormat::Yuyv, CaptureFormat::Auto],
        PixelFormat::Yuyv => [CaptureFormat::Yuyv, CaptureFormat::Mjpeg, CaptureFormat::Auto],
    }
}

/// Camera capture settings shared by value into every worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Target frames per second
    pub fps: u32,
    /// Preferred capture format
    pub format: PixelFormat,
    /// Upper bound on cameras tracked at once
    pub max_cameras: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            format: DEFAULT_FORMAT,
            max_cameras: DEFAULT_MAX_CAMERAS,
        }
    }
}

impl Settings {
    /// Replace zero values with defaults
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.width == 0 {
            self.width = defaults.width;
        }
        if self.height == 0 {
            self.height = defaults.height;
        }
        if self.fps == 0 {
            self.fps = defaults.fps;
        }
        if self.max_cameras == 0 {
            self.max_cameras = defaults.max_cameras;
        }
        self
    }
}

/// A discovered camera.
///
/// `device_id` is the USB parent path and survives reconnects;
/// `device_path` is the video node and may change between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub device_id: String,
    pub device_path: PathBuf,
    pub name: String,
}

impl Camera {
    pub fn new(device_id: impl Into<String>, device_path: impl Into<PathBuf>) -> Self {
        let device_path = device_path.into();
        let name = device_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            device_id: device_id.into(),
            device_path,
            name,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.device_path.display())
    }
}
