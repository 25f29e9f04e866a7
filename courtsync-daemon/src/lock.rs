//! Cross-process engine lock.
//!
//! The store and queue files are rewritten whole, so only one process may
//! run the engine against a home at a time. The daemon holds the lock for
//! its lifetime; an in-process `courtsync sync` holds it for one cycle.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use courtsync_core::config;

use crate::error::{io_err, DaemonError};
use crate::paths::lock_path;

/// Exclusive advisory lock on `~/.courtsync/engine.lock`, released on drop.
#[derive(Debug)]
pub struct EngineLock {
    file: File,
    path: PathBuf,
}

impl EngineLock {
    /// Take the lock without blocking. `AlreadyRunning` if another process
    /// (or another handle in this one) holds it.
    pub fn acquire(home: &Path) -> Result<Self, DaemonError> {
        config::ensure_root_at(home)?;
        let path = lock_path(home);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(lock = %path.display(), "engine lock acquired");
                Ok(Self { file, path })
            }
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(DaemonError::AlreadyRunning { lock: path })
            }
            Err(err) => Err(io_err(&path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EngineLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
