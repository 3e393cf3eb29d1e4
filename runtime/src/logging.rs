//! Log sink setup: human-readable stderr plus a size-rotated JSON-lines file.
//!
//! Rotation keeps `slothound.log.1` .. `slothound.log.5`; the oldest is
//! dropped when a new rotation happens.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Maximum log size before rotation (10 MB).
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to keep.
pub const MAX_ROTATIONS: u32 = 5;

/// Default log file, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "logs/slothound.log";

/// Append-only file writer with size-based rotation.
pub struct RotatingFile {
    file: File,
    path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            max_size,
            current_size,
        })
    }

    /// Shift `log.N` → `log.N+1`, move the live file to `.1`, reopen.
    fn rotate(&mut self) -> std::io::Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))
}

/// Build path for a rotated log file: `slothound.log.1`, `slothound.log.2`, etc.
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("slothound.log")
    );
    base.with_file_name(name)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `slothound=info`, or `debug` when
/// verbose. A log file that cannot be opened only costs the file sink.
pub fn init(verbose: bool, quiet: bool, log_file: Option<&Path>) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "slothound={default_level},slothound_runtime={default_level}"
        ))
    });

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = log_file.and_then(|path| match RotatingFile::open(path, MAX_LOG_SIZE) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("  Warning: file logging disabled: {e:#}");
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}
