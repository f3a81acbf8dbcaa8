//! Best-effort cleanup of processes still holding a video node open.
//!
//! A capture process that died badly can leave the node busy; the next
//! spawn then fails with EBUSY until the holder goes away.

use std::path::Path;
use std::time::{Duration, Instant};

/// How long killed holders get to release the node
const HOLDER_EXIT_TIMEOUT: Duration = Duration::from_millis(500);

/// PIDs under `proc_root` with an open descriptor on `device`
pub fn find_device_holders(proc_root: &Path, device: &Path) -> Vec<i32> {
    let target = std::fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());

    let entries = match std::fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("[Holders] Cannot read {}: {}", proc_root.display(), e);
            return Vec::new();
        }
    };

    let mut pids: Vec<i32> = entries
        .flatten()
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<i32>().ok()?;
            holds_device(&entry.path().join("fd"), &target).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

fn holds_device(fd_dir: &Path, target: &Path) -> bool {
    // Other users' fd tables are unreadable; those are skipped silently
    let Ok(fds) = std::fs::read_dir(fd_dir) else {
        return false;
    };
    fds.flatten()
        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
        .any(|link| {
            link == target || std::fs::canonicalize(&link).is_ok_and(|resolved| resolved == target)
        })
}

/// Kill whatever holds `device` open. Returns true if any process was signalled.
///
/// Never fails: errors are logged and treated as "nothing killed".
pub fn kill_device_holders(device: &Path, enabled: bool) -> bool {
    if !enabled {
        return false;
    }

    let own_pid = std::process::id() as i32;
    let holders: Vec<i32> = find_device_holders(Path::new("/proc"), device)
        .into_iter()
        .filter(|pid| *pid != own_pid)
        .collect();

    if holders.is_empty() {
        return false;
    }

    log::warn!(
        "[Holders] {} is held by PID(s) {:?}, killing",
        device.display(),
        holders
    );
    let killed: Vec<i32> = holders.into_iter().filter(|pid| terminate(*pid)).collect();
    if killed.is_empty() {
        return false;
    }
    wait_for_release(device, killed, HOLDER_EXIT_TIMEOUT);
    true
}

/// Wait until every PID in `pids` has exited or dropped its descriptor on `device`
fn wait_for_release(device: &Path, mut pids: Vec<i32>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        // an unreaped zombie has already closed its descriptors
        let holders = find_device_holders(Path::new("/proc"), device);
        pids.retain(|pid| is_pid_alive(*pid) && holders.contains(pid));
        if pids.is_empty() {
            return;
        }
        if Instant::now() >= deadline {
            log::warn!(
                "[Holders] PID(s) {:?} still hold {} after SIGKILL",
                pids,
                device.display()
            );
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(unix)]
fn terminate(pid: i32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("[Holders] Failed to kill PID {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: i32) -> bool {
    false
}

/// Whether a process with this PID exists (signal 0 probe)
#[cfg(unix)]
pub fn is_pid_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: i32) -> bool {
    false
}

/// Permission failures look the same as a vanished node to discovery
pub fn is_permission_error(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_kills_nothing() {
        assert!(!kill_device_holders(Path::new("/dev/video0"), false));
    }

    #[test]
    fn test_find_holders_in_fake_proc() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("video0");
        std::fs::write(&device, b"").unwrap();
        let other = tmp.path().join("video1");
        std::fs::write(&other, b"").unwrap();

        let proc_root = tmp.path().join("proc");
        for (pid, target) in [("42", &device), ("7", &other), ("9", &device)] {
            let fd_dir = proc_root.join(pid).join("fd");
            std::fs::create_dir_all(&fd_dir).unwrap();
            std::os::unix::fs::symlink(target, fd_dir.join("3")).unwrap();
        }
        // not a pid
        std::fs::create_dir_all(proc_root.join("self_status")).unwrap();

        assert_eq!(find_device_holders(&proc_root, &device), vec![9, 42]);
        assert_eq!(find_device_holders(&proc_root, &other), vec![7]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_kill_returns_once_node_released() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("video0");
        std::fs::write(&device, b"").unwrap();

        let node = std::fs::File::open(&device).unwrap();
        let mut holder = std::process::Command::new("sleep")
            .arg("30")
            .stdin(node)
            .spawn()
            .unwrap();
        let pid = holder.id() as i32;
        assert!(find_device_holders(Path::new("/proc"), &device).contains(&pid));

        assert!(kill_device_holders(&device, true));
        assert!(find_device_holders(Path::new("/proc"), &device).is_empty());
        holder.wait().unwrap();
        assert!(!is_pid_alive(pid));

        // nothing left to kill
        assert!(!kill_device_holders(&device, true));
    }

    #[test]
    fn test_missing_proc_root() {
        let tmp = tempfile::tempdir().unwrap();
        let holders = find_device_holders(&tmp.path().join("nope"), Path::new("/dev/video0"));
        assert!(holders.is_empty());
    }

    #[test]
    fn test_is_pid_alive() {
        assert!(is_pid_alive(std::process::id() as i32));
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(-1));
    }

    #[test]
    fn test_is_permission_error() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(is_permission_error(&denied));
        assert!(!is_permission_error(&missing));
    }
}
