//! Observable sync status.
//!
//! [`StatusPublisher`] wraps a `tokio::sync::watch` channel; every
//! subscriber sees each transition `Idle → Syncing → Success | Failure`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing { started_at: DateTime<Utc> },
    Success { at: DateTime<Utc> },
    Failure { error: String, at: DateTime<Utc> },
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing { .. } => "syncing",
            SyncStatus::Success { .. } => "success",
            SyncStatus::Failure { .. } => "failure",
        }
    }
}

#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<SyncStatus>,
    last_success: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::Idle);
        Self {
            tx,
            last_success: parking_lot::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    pub fn set(&self, status: SyncStatus) {
        if let SyncStatus::Success { at } = &status {
            *self.last_success.lock() = Some(*at);
        }
        tracing::debug!(state = status.label(), "sync status");
        self.tx.send_replace(status);
    }

    /// User-facing one-liner for the current state.
    pub fn describe(&self) -> String {
        describe(&self.current(), self.last_success(), Utc::now())
    }
}

/// "last synced 2m ago", "sync failed, will retry", ...
pub fn describe(
    status: &SyncStatus,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    match status {
        SyncStatus::Syncing { .. } => "syncing…".to_string(),
        SyncStatus::Failure { .. } => "sync failed, will retry".to_string(),
        SyncStatus::Success { at } => format!("last synced {}", format_age(*at, now)),
        SyncStatus::Idle => match last_success {
            Some(at) => format!("last synced {}", format_age(at, now)),
            None => "never synced".to_string(),
        },
    }
}

/// Compact age: "just now", "45s ago", "2m ago", "3h ago", "2d ago".
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    if secs < 5 {
        "just now".to_string()
    } else if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3_600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3_600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
