//! Video device discovery and hotplug detection.
//!
//! Cameras are identified by their USB parent in sysfs, not by their
//! `/dev/videoN` node: a UVC camera usually exposes a capture node and a
//! metadata node, and a reconnect may hand out a different node number.

pub mod holders;

pub use holders::{is_permission_error, is_pid_alive, kill_device_holders};

use crate::camera::Camera;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Where and how to look for cameras
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Directory holding the `videoN` nodes
    pub dev_dir: PathBuf,
    /// `video4linux` class directory in sysfs
    pub sysfs_dir: PathBuf,
    /// Cameras tracked at most
    pub max_cameras: usize,
    /// Kill stale holders of newly attached nodes
    pub kill_device_holders: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
            sysfs_dir: PathBuf::from("/sys/class/video4linux"),
            max_cameras: crate::camera::DEFAULT_MAX_CAMERAS,
            kill_device_holders: true,
        }
    }
}

/// Change in the set of connected cameras
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(Camera),
    Detached(Camera),
}

impl HotplugEvent {
    pub fn camera(&self) -> &Camera {
        match self {
            HotplugEvent::Attached(camera) | HotplugEvent::Detached(camera) => camera,
        }
    }
}

/// Numeric suffix of a `videoN` node name
fn video_index(name: &str) -> Option<u32> {
    name.strip_prefix("video")?.parse().ok()
}

/// Resolve a video node to the sysfs directory of its USB device.
///
/// Non-USB devices resolve to their canonical device directory; `None`
/// when the node has no sysfs entry at all.
pub fn resolve_usb_parent(sysfs_dir: &Path, node_name: &str) -> Option<PathBuf> {
    let device = std::fs::canonicalize(sysfs_dir.join(node_name).join("device")).ok()?;

    let usb_parent = device
        .ancestors()
        .find(|dir| dir.join("idVendor").is_file())
        .map(Path::to_path_buf);

    Some(usb_parent.unwrap_or(device))
}

/// Enumerates cameras and diffs them against the tracked set
pub struct DeviceScanner {
    config: ScannerConfig,
    tracked: IndexMap<String, Camera>,
}

impl DeviceScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            tracked: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// One camera per USB parent, in node order, capped at `max_cameras`
    pub fn enumerate(&self) -> Vec<Camera> {
        let entries = match std::fs::read_dir(&self.config.dev_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "[Discovery] Cannot list {}: {}",
                    self.config.dev_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut nodes: Vec<(u32, String)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                video_index(&name).map(|index| (index, name))
            })
            .collect();
        nodes.sort_unstable();

        let mut seen = HashSet::new();
        let mut cameras = Vec::new();

        for (_, node) in nodes {
            if cameras.len() >= self.config.max_cameras {
                break;
            }

            let path = self.config.dev_dir.join(&node);
            if let Err(e) = std::fs::metadata(&path) {
                if is_permission_error(&e) {
                    log::debug!("[Discovery] No permission for {}", path.display());
                }
                continue;
            }

            let device_id = resolve_usb_parent(&self.config.sysfs_dir, &node)
                .unwrap_or_else(|| path.clone())
                .to_string_lossy()
                .into_owned();

            if !seen.insert(device_id.clone()) {
                log::debug!(
                    "[Discovery] Skipping {}: same device as an earlier node",
                    path.display()
                );
                continue;
            }

            let name = std::fs::read_to_string(self.config.sysfs_dir.join(&node).join("name"))
                .map(|name| name.trim().to_string())
                .unwrap_or_default();

            let mut camera = Camera::new(device_id, path);
            if !name.is_empty() {
                camera = camera.with_name(name);
            }
            cameras.push(camera);
        }

        cameras
    }

    /// Startup discovery: enumerate at most `limit` cameras, free any node a
    /// stale process still holds, and make the result the tracked set
    pub fn discover(&mut self, limit: usize) -> Vec<Camera> {
        let cameras: Vec<Camera> = self.enumerate().into_iter().take(limit).collect();
        for camera in &cameras {
            self.free(camera);
        }
        self.track(&cameras);
        cameras
    }

    fn free(&self, camera: &Camera) {
        if kill_device_holders(&camera.device_path, self.config.kill_device_holders) {
            log::info!("[Discovery] Freed {}", camera.device_path.display());
        }
    }

    /// Replace the tracked set without emitting events
    pub fn track(&mut self, cameras: &[Camera]) {
        self.tracked = cameras
            .iter()
            .map(|camera| (camera.device_id.clone(), camera.clone()))
            .collect();
    }

    pub fn tracked(&self) -> Vec<Camera> {
        self.tracked.values().cloned().collect()
    }

    /// Enumerate again and report what changed since the last scan.
    ///
    /// Detaches come first. A tracked device that reappears on a different
    /// node is reported as a detach of the old node plus an attach of the new one.
    pub fn scan(&mut self) -> Vec<HotplugEvent> {
        let current: IndexMap<String, Camera> = self
            .enumerate()
            .into_iter()
            .map(|camera| (camera.device_id.clone(), camera))
            .collect();

        let mut events = Vec::new();

        for (id, old) in &self.tracked {
            let still_there = current
                .get(id)
                .is_some_and(|camera| camera.device_path == old.device_path);
            if !still_there {
                log::info!("[Discovery] Camera detached: {}", old);
                events.push(HotplugEvent::Detached(old.clone()));
            }
        }

        for (id, camera) in &current {
            let known = self
                .tracked
                .get(id)
                .is_some_and(|old| old.device_path == camera.device_path);
            if !known {
                self.free(camera);
                log::info!("[Discovery] Camera attached: {}", camera);
                events.push(HotplugEvent::Attached(camera.clone()));
            }
        }

        self.tracked = current;
        events
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::SysfsTree as Tree;

    #[test]
    fn test_video_index() {
        assert_eq!(video_index("video0"), Some(0));
        assert_eq!(video_index("video12"), Some(12));
        assert_eq!(video_index("video"), None);
        assert_eq!(video_index("vbi0"), None);
    }

    #[test]
    fn test_resolve_usb_parent_walks_up() {
        let tree = Tree::new();
        let usb = tree.usb_device("1-1");
        tree.add_node("video0", &usb, "1-1:1.0", "Cam A");

        let parent = resolve_usb_parent(&tree.sysfs_dir(), "video0").unwrap();
        assert_eq!(parent, std::fs::canonicalize(&usb).unwrap());
        assert!(resolve_usb_parent(&tree.sysfs_dir(), "video9").is_none());
    }

    #[test]
    fn test_enumerate_dedups_multi_node_devices() {
        let tree = Tree::new();
        let a = tree.usb_device("1-1");
        let b = tree.usb_device("1-2");
        tree.add_node("video0", &a, "1-1:1.0", "Cam A");
        tree.add_node("video1", &a, "1-1:1.0", "Cam A");
        tree.add_node("video2", &b, "1-2:1.0", "Cam B");
        tree.add_node("video10", &b, "1-2:1.1", "Cam B");

        let cameras = DeviceScanner::new(tree.config(8)).enumerate();
        let nodes: Vec<_> = cameras.iter().map(|c| c.device_path.clone()).collect();
        assert_eq!(
            nodes,
            vec![
                tree.dev_dir().join("video0"),
                tree.dev_dir().join("video2")
            ]
        );
        assert_eq!(cameras[0].name, "Cam A");
        assert_ne!(cameras[0].device_id, cameras[1].device_id);
    }

    #[test]
    fn test_enumerate_numeric_order_and_cap() {
        let tree = Tree::new();
        for (i, node) in ["video10", "video2", "video1"].iter().enumerate() {
            let usb = tree.usb_device(&format!("1-{}", i + 1));
            tree.add_node(node, &usb, "1.0", "cam");
        }

        let cameras = DeviceScanner::new(tree.config(2)).enumerate();
        let names: Vec<_> = cameras
            .iter()
            .map(|c| c.device_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["video1", "video2"]);
    }

    #[test]
    fn test_node_without_sysfs_uses_node_path() {
        let tree = Tree::new();
        std::fs::write(tree.dev_dir().join("video0"), b"").unwrap();

        let cameras = DeviceScanner::new(tree.config(3)).enumerate();
        assert_eq!(cameras.len(), 1);
        assert_eq!(
            cameras[0].device_id,
            tree.dev_dir().join("video0").to_string_lossy()
        );
        assert_eq!(cameras[0].name, "video0");
    }

    #[test]
    fn test_scan_reports_attach_detach_and_moves() {
        let tree = Tree::new();
        let a = tree.usb_device("1-1");
        let b = tree.usb_device("1-2");
        tree.add_node("video0", &a, "1.0", "Cam A");

        let mut scanner = DeviceScanner::new(tree.config(3));
        let events = scanner.scan();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], HotplugEvent::Attached(c) if c.name == "Cam A"));
        assert!(scanner.scan().is_empty());

        tree.add_node("video2", &b, "1.0", "Cam B");
        let events = scanner.scan();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], HotplugEvent::Attached(c) if c.name == "Cam B"));

        // Cam A comes back on another node
        tree.remove_node("video0");
        tree.add_node("video4", &a, "1.0", "Cam A");
        let events = scanner.scan();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], HotplugEvent::Detached(c) if c.device_path.ends_with("video0")));
        assert!(matches!(&events[1], HotplugEvent::Attached(c) if c.device_path.ends_with("video4")));
        assert_eq!(events[0].camera().device_id, events[1].camera().device_id);

        tree.remove_node("video2");
        let events = scanner.scan();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], HotplugEvent::Detached(c) if c.name == "Cam B"));
        assert_eq!(scanner.tracked().len(), 1);
    }

    #[test]
    fn test_track_sets_baseline() {
        let tree = Tree::new();
        let a = tree.usb_device("1-1");
        tree.add_node("video0", &a, "1.0", "Cam A");

        let mut scanner = DeviceScanner::new(tree.config(3));
        let cameras = scanner.enumerate();
        scanner.track(&cameras);
        assert!(scanner.scan().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_discover_frees_held_node_and_tracks() {
        use std::os::unix::process::ExitStatusExt;
        use std::time::{Duration, Instant};

        let tree = Tree::new();
        let a = tree.usb_device("1-1");
        tree.add_node("video0", &a, "1.0", "Cam A");

        // a leftover process keeping the node open on stdin
        let node = std::fs::File::open(tree.dev_dir().join("video0")).unwrap();
        let mut holder = std::process::Command::new("sleep")
            .arg("30")
            .stdin(node)
            .spawn()
            .unwrap();

        let mut config = tree.config(4);
        config.kill_device_holders = true;
        let mut scanner = DeviceScanner::new(config);
        let cameras = scanner.discover(4);
        assert_eq!(cameras.len(), 1);
        assert_eq!(scanner.tracked(), cameras);

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Some(status) = holder.try_wait().unwrap() {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = holder.kill();
                panic!("holder survived discovery");
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(status.signal(), Some(9));
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn test_discover_respects_limit() {
        let tree = Tree::new();
        for (i, node) in ["video0", "video2", "video4"].iter().enumerate() {
            let usb = tree.usb_device(&format!("1-{}", i + 1));
            tree.add_node(node, &usb, "1.0", "cam");
        }

        let mut scanner = DeviceScanner::new(tree.config(8));
        assert_eq!(scanner.discover(2).len(), 2);
        assert_eq!(scanner.tracked().len(), 2);
    }
}
