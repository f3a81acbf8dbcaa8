//! Frame sources: what a capture worker spawns to get decoded frames.
//!
//! `FfmpegSource` runs `ffmpeg` against the V4L2 node and reads fixed-size
//! RGB24 frames from its stdout. Tests plug in scripted sources instead.

use super::frame::Frame;
use super::process::{CaptureProcess, ProcessConfig, ProcessError};
use super::settings::{Camera, CaptureFormat};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;

/// Parameters for one capture attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: CaptureFormat,
}

/// Errors raised while capturing. All of them are recoverable from the
/// worker's point of view.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Opens capture streams for a camera
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(
        &self,
        camera: &Camera,
        request: &CaptureRequest,
    ) -> Result<Box<dyn FrameStream>, CaptureError>;
}

/// A live capture stream backed by one subprocess
#[async_trait]
pub trait FrameStream: Send {
    /// Next decoded frame; `Ok(None)` once the producer has exited
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Terminate the producer, waiting at most `grace` before forcing it
    async fn close(&mut self, grace: Duration);
}

/// `ffmpeg`-backed frame source
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    executable: String,
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self {
            executable: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegSource {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Command line for one capture attempt
    pub fn command_args(camera: &Camera, request: &CaptureRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-f", "v4l2"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let Some(input_format) = request.format.input_format() {
            args.push("-input_format".to_string());
            args.push(input_format.to_string());
        }

        args.extend([
            "-video_size".to_string(),
            format!("{}x{}", request.width, request.height),
            "-framerate".to_string(),
            request.fps.to_string(),
            "-i".to_string(),
            camera.device_path.to_string_lossy().into_owned(),
            // The driver may ignore the requested size in auto mode
            "-vf".to_string(),
            format!("scale={}:{}", request.width, request.height),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-".to_string(),
        ]);

        args
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(
        &self,
        camera: &Camera,
        request: &CaptureRequest,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        let config = ProcessConfig {
            name: format!("ffmpeg:{}", camera.name),
            executable: self.executable.clone(),
            args: Self::command_args(camera, request),
        };
        let (process, stdout) = CaptureProcess::spawn(&config)?;

        Ok(Box::new(FfmpegStream {
            process,
            stdout,
            width: request.width,
            height: request.height,
        }))
    }
}

struct FfmpegStream {
    process: CaptureProcess,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let mut data = vec![0u8; Frame::rgb24_len(self.width, self.height)];
        match self.stdout.read_exact(&mut data).await {
            Ok(_) => Ok(Some(Frame::new(data, self.width, self.height))),
            // EOF, possibly in the middle of a frame: the process is gone
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(CaptureError::Io(e)),
        }
    }

    async fn close(&mut self, grace: Duration) {
        let pid = self.process.pid();
        let uptime = self.process.uptime();
        let code = self.process.stop(grace).await;
        log::debug!(
            "ffmpeg (PID {:?}) closed after {:?} (exit code {:?})",
            pid,
            uptime,
            code
        );
    }
}
