//! Logger setup: `env_logger` writing to stdout, a size-rotated file, or both.

use crate::config::LogConfig;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Map a configured level name onto a `log` filter. Unknown names mean INFO.
pub fn parse_level(name: &str) -> log::LevelFilter {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => log::LevelFilter::Trace,
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARNING" | "WARN" => log::LevelFilter::Warn,
        "ERROR" | "CRITICAL" => log::LevelFilter::Error,
        "OFF" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Size-capped log file that rolls `file` over to `file.1` … `file.N`
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: u32) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backup_count > 0 {
            for i in (1..=self.backup_count).rev() {
                let src = if i == 1 {
                    self.path.clone()
                } else {
                    self.backup(i - 1)
                };
                let dst = self.backup(i);
                if src.exists() {
                    let _ = std::fs::remove_file(&dst);
                    std::fs::rename(&src, &dst)?;
                }
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes
        {
            if let Err(e) = self.rotate() {
                eprintln!("[Logging] Failed to rotate {}: {}", self.path.display(), e);
            }
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Fans each log line out to stdout and/or the rotating file
struct LogTarget {
    stdout: bool,
    file: Option<RotatingFileWriter>,
}

impl Write for LogTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout {
            io::stdout().write_all(buf)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout {
            io::stdout().flush()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logger already initialized: {0}")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Install the global logger.
///
/// `level_override` (from the CLI) beats the configured level; `RUST_LOG`
/// beats both. A log file that cannot be opened falls back to stdout.
pub fn init(config: &LogConfig, level_override: Option<&str>) -> Result<(), LoggingError> {
    let level = parse_level(level_override.unwrap_or(&config.level));

    let (file, file_error) = match config.file.as_ref() {
        Some(path) => match RotatingFileWriter::open(path, config.max_bytes, config.backup_count) {
            Ok(writer) => (Some(writer), None),
            Err(e) => (None, Some(format!("{}: {}", path.display(), e))),
        },
        None => (None, None),
    };
    let stdout = config.stdout || file.is_none();

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(LogTarget { stdout, file })))
        .try_init()?;

    if let Some(error) = file_error {
        log::warn!("[Logging] Failed to configure file logging ({}), using stdout", error);
    }
    Ok(())
}
