//! Ambient logging stack: a `tracing-subscriber` registry combining the
//! pretty progress layer for interactive stderr output with a size-rotating
//! file layer writing to `<app_dir>/app.log`.
//!
//! `tracing-appender` only rotates on a time schedule, so the file side is
//! hand-rolled on top of a plain `std::fs::File`, mirroring the Python
//! original's `RotatingFileHandler(maxBytes=5MiB, backupCount=5)`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::progress::PrettyProgressLayer;

const MAX_BYTES: u64 = 5 * 1024 * 1024;
const BACKUP_COUNT: u32 = 5;

/// Installs the global tracing subscriber. `noisy` corresponds to
/// `DEVEXY_NOISY`; when unset, only `info` and above are shown.
pub fn init(app_dir: &Path, noisy: bool) -> io::Result<()> {
    fs::create_dir_all(app_dir)?;
    let writer = RotatingFileWriter::new(app_dir.join("app.log"));

    let filter = EnvFilter::try_from_env("DEVEXY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if noisy { "debug" } else { "info" }));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(PrettyProgressLayer::new())
        .init();

    Ok(())
}

/// A `Write` implementation that rotates `app.log` -> `app.log.1` -> ... ->
/// `app.log.5` once the active file exceeds `MAX_BYTES`, dropping the
/// oldest backup.
struct RotatingFileWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl RotatingFileWriter {
    fn new(path: PathBuf) -> Self {
        let file = open_append(&path).expect("failed to open log file");
        RotatingFileWriter {
            path,
            file: Mutex::new(file),
        }
    }

    fn rotate_if_needed(&self, incoming_len: usize) {
        let mut file = self.file.lock().unwrap();
        let current_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if current_len + incoming_len as u64 <= MAX_BYTES {
            return;
        }

        for i in (1..BACKUP_COUNT).rev() {
            let from = backup_path(&self.path, i);
            let to = backup_path(&self.path, i + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to);
            }
        }
        let _ = fs::rename(&self.path, backup_path(&self.path, 1));

        if let Ok(fresh) = open_append(&self.path) {
            *file = fresh;
        }
    }
}

fn backup_path(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for &RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rotate_if_needed(buf.len());
        let mut file = self.file.lock().unwrap();
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = &'a RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_preserves_recent_backup_naming() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("app.log");
        let writer = RotatingFileWriter::new(log_path.clone());

        // force a rotation by asserting the current size already exceeds budget
        writer.rotate_if_needed(MAX_BYTES as usize + 1);
        assert!(backup_path(&log_path, 1).exists());
    }

    #[test]
    fn small_writes_do_not_rotate() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("app.log");
        let writer = RotatingFileWriter::new(log_path.clone());
        writer.rotate_if_needed(10);
        assert!(!backup_path(&log_path, 1).exists());
    }
}
