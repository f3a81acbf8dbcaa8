//! Fixtures shared by unit tests: a fake device tree and a frame source
//! that streams synthetic frames without spawning anything.

use crate::camera::{Camera, CaptureError, CaptureRequest, Frame, FrameSource, FrameStream};
use crate::discovery::ScannerConfig;
use async_trait::async_trait;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A fake `/dev` directory plus matching `video4linux` sysfs class
pub struct SysfsTree {
    pub root: tempfile::TempDir,
}

impl SysfsTree {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("dev")).unwrap();
        std::fs::create_dir_all(root.path().join("class")).unwrap();
        Self { root }
    }

    pub fn dev_dir(&self) -> PathBuf {
        self.root.path().join("dev")
    }

    pub fn sysfs_dir(&self) -> PathBuf {
        self.root.path().join("class")
    }

    pub fn config(&self, max_cameras: usize) -> ScannerConfig {
        ScannerConfig {
            dev_dir: self.dev_dir(),
            sysfs_dir: self.sysfs_dir(),
            max_cameras,
            kill_device_holders: false,
        }
    }

    /// Create a USB device directory (one with `idVendor`)
    pub fn usb_device(&self, port: &str) -> PathBuf {
        let dir = self.root.path().join("devices/usb1").join(port);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("idVendor"), "046d\n").unwrap();
        dir
    }

    /// Add a node whose interface lives under `usb_dir`
    pub fn add_node(&self, node: &str, usb_dir: &Path, interface: &str, name: &str) {
        std::fs::write(self.dev_dir().join(node), b"").unwrap();
        let iface = usb_dir.join(interface);
        std::fs::create_dir_all(&iface).unwrap();
        let class_dir = self.sysfs_dir().join(node);
        std::fs::create_dir_all(&class_dir).unwrap();
        symlink(&iface, class_dir.join("device")).unwrap();
        std::fs::write(class_dir.join("name"), format!("{}\n", name)).unwrap();
    }

    pub fn remove_node(&self, node: &str) {
        std::fs::remove_file(self.dev_dir().join(node)).unwrap();
        std::fs::remove_dir_all(self.sysfs_dir().join(node)).unwrap();
    }
}

/// Streams a small frame every few milliseconds until closed
#[derive(Default)]
pub struct StreamingSource {
    pub opened: AtomicUsize,
    pub live: Arc<AtomicUsize>,
}

struct SyntheticStream {
    live: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl FrameSource for StreamingSource {
    async fn open(
        &self,
        _camera: &Camera,
        _request: &CaptureRequest,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            live: self.live.clone(),
            closed: false,
        }))
    }
}

#[async_trait]
impl FrameStream for SyntheticStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Some(Frame::new(vec![0; 12], 2, 2)))
    }

    async fn close(&mut self, _grace: Duration) {
        if !self.closed {
            self.closed = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
