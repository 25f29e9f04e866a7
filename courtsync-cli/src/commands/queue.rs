//! `courtsync queue`: pending operations awaiting replay.

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use tabled::{settings::Style, Table, Tabled};

use courtsync_core::types::SyncOperation;
use courtsync_daemon::{request_queue, DaemonError};
use courtsync_sync::{JsonFileSlot, PendingOperationQueue};

/// Arguments for `courtsync queue`.
#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Deserialize)]
struct QueuePayload {
    operations: Vec<SyncOperation>,
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Queued At")]
    enqueued_at: String,
}

impl QueueArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;

        // A running daemon owns the queue file; ask it rather than read a
        // snapshot that may be mid-rewrite.
        let operations = match request_queue(&home) {
            Ok(data) => {
                serde_json::from_value::<QueuePayload>(data)
                    .context("unexpected daemon queue payload")?
                    .operations
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                PendingOperationQueue::load(JsonFileSlot::at(&home)).snapshot()
            }
            Err(err) => return Err(err).context("failed to query daemon queue"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&operations)
                    .context("failed to serialize queue JSON")?
            );
            return Ok(());
        }

        if operations.is_empty() {
            println!("No pending operations.");
            return Ok(());
        }

        let rows: Vec<QueueRow> = operations
            .iter()
            .enumerate()
            .map(|(index, op)| QueueRow {
                position: index + 1,
                op: op.op.to_string(),
                kind: op.kind.to_string(),
                id: op.id.to_string(),
                enqueued_at: op.enqueued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} pending operation(s)", operations.len());
        Ok(())
    }
}
