//! Capture subprocess handle

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Configuration for spawning a capture process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Process name (for logging)
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
}

/// A running capture subprocess.
///
/// Owned by exactly one stream at a time. `kill_on_drop` is set so a handle
/// that is dropped without `stop` still takes the child down with it.
pub struct CaptureProcess {
    name: String,
    pid: Option<u32>,
    started_at: Instant,
    child: Option<Child>,
}

impl CaptureProcess {
    /// Spawn the process with stdout piped for frame data
    pub fn spawn(config: &ProcessConfig) -> Result<(Self, ChildStdout), ProcessError> {
        log::debug!(
            "[{}] Starting: {} {}",
            config.name,
            config.executable,
            config.args.join(" ")
        );

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            name: config.name.clone(),
            source: e,
        })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::MissingStdout(config.name.clone()))?;

        // Forward stderr lines to the log
        if let Some(stderr) = child.stderr.take() {
            let name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{}] {}", name, line);
                }
            });
        }

        log::debug!("[{}] Process started with PID: {:?}", config.name, pid);

        Ok((
            Self {
                name: config.name.clone(),
                pid,
                started_at: Instant::now(),
                child: Some(child),
            },
            stdout,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after `grace`).
    ///
    /// Returns the exit code when one was reported. Safe to call twice.
    pub async fn stop(&mut self, grace: Duration) -> Option<i32> {
        let mut child = self.child.take()?;

        // Try graceful shutdown first (SIGTERM on Unix)
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::warn!("[{}] Error waiting for process: {}", self.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit within {:?}, forcing kill",
                    self.name,
                    grace
                );
                if let Err(e) = child.kill().await {
                    log::warn!("[{}] Failed to kill process: {}", self.name, e);
                }
                None
            }
        };

        log::debug!("[{}] Process exited with code: {:?}", self.name, code);
        self.pid = None;
        code
    }
}

/// Errors that can occur with capture processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{0}' has no stdout pipe")]
    MissingStdout(String),
}
