//! Realtime change listener.
//!
//! A `TableChange` only says "something in this table moved". The payload is
//! never trusted; each accepted event requests a full cycle.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use courtsync_core::types::EntityKind;

use crate::error::DaemonError;
use crate::paths::DEBOUNCE_WINDOW;
use crate::scheduler::{SchedulerHandle, Trigger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChange {
    pub table: String,
}

impl TableChange {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

/// Spawn the listener with the default debounce window.
pub fn spawn_listener(
    handle: SchedulerHandle,
    changes: mpsc::Receiver<TableChange>,
    shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<Result<(), DaemonError>> {
    tokio::spawn(listener_task(handle, changes, shutdown_rx, DEBOUNCE_WINDOW))
}

pub(crate) async fn listener_task(
    handle: SchedulerHandle,
    mut changes: mpsc::Receiver<TableChange>,
    mut shutdown_rx: broadcast::Receiver<()>,
    window: Duration,
) -> Result<(), DaemonError> {
    let mut debounce = HashMap::<EntityKind, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_change = changes.recv() => {
                let Some(change) = maybe_change else { break };
                let Some(kind) = EntityKind::from_table(&change.table) else {
                    tracing::debug!(table = %change.table, "ignoring change for unknown table");
                    continue;
                };
                if !should_process_change(&mut debounce, kind, Instant::now(), window) {
                    continue;
                }
                tracing::info!(kind = %kind, "remote change; requesting cycle");
                handle.request(Trigger::Realtime(kind));
            }
        }
    }
    Ok(())
}

/// Leading-edge debounce per kind.
fn should_process_change(
    debounce: &mut HashMap<EntityKind, Instant>,
    kind: EntityKind,
    now: Instant,
    window: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(&kind) {
        Some(last_seen) if now.duration_since(*last_seen) < window => false,
        _ => {
            debounce.insert(kind, now);
            true
        }
    }
}
