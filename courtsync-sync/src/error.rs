//! Error types for courtsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use courtsync_core::error::ConfigError;

/// Failure reported by a [`RemoteGateway`](crate::gateway::RemoteGateway) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transient transport failure: timeout, reset connection, interrupted body.
    #[error("network error: {0}")]
    Network(String),

    /// The remote could not be reached at all (offline, DNS, refused).
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// Credentials missing, expired or rejected.
    #[error("remote rejected credentials")]
    Unauthorized,

    /// The addressed row does not exist remotely.
    #[error("remote record not found")]
    NotFound,

    /// Non-success status the remote reported with its own message.
    #[error("remote error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response could not be decoded into the expected shape.
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Fatal errors abort the whole cycle; the rest are per-entity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Unauthorized | Self::Malformed(_)
        )
    }
}

/// Failure reported by a [`LocalStore`](crate::store::LocalStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store document could not be (de)serialized.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-specific failure (used by embedders and test doubles).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure persisting or loading the pending operation log.
#[derive(Debug, Error)]
pub enum QueueError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Queue JSON serialization/deserialization error.
    #[error("queue JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The slot refused the write.
    #[error("queue slot unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error for composing the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SyncError {
    /// Only remote failures can be fatal; local failures are scoped to the
    /// entity or operation that hit them.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Remote(error) => error.is_fatal(),
            _ => false,
        }
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`QueueError::Io`].
pub(crate) fn queue_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(RemoteError::Unreachable("offline".into()).is_fatal());
        assert!(RemoteError::Unauthorized.is_fatal());
        assert!(RemoteError::Malformed("not json".into()).is_fatal());
        assert!(!RemoteError::Network("timeout".into()).is_fatal());
        assert!(!RemoteError::NotFound.is_fatal());
        assert!(!RemoteError::server(500, "boom").is_fatal());
    }

    #[test]
    fn server_error_message() {
        assert_eq!(
            RemoteError::server(409, "duplicate key").to_string(),
            "remote error (409): duplicate key"
        );
    }
}
