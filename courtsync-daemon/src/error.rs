use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, scheduler, and socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] courtsync_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] courtsync_sync::SyncError),

    #[error("store error: {0}")]
    Store(#[from] courtsync_sync::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another courtsync process is running the sync engine (lock held: {lock})")]
    AlreadyRunning { lock: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
