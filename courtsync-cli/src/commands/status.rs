//! `courtsync status`: sync state and unsynced work.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

use courtsync_core::config;
use courtsync_core::entity::SyncableEntity;
use courtsync_core::types::EntityKind;
use courtsync_daemon::{build_orchestrator, request_status, DaemonError};
use courtsync_sync::status::{describe, format_age};
use courtsync_sync::SyncStatus;

/// Arguments for `courtsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Fields shared by the daemon payload and the offline report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatusReport {
    running: bool,
    describe: String,
    enabled: bool,
    #[serde(default)]
    online: Option<bool>,
    pending_operations: usize,
    #[serde(default)]
    dirty_entities: Option<usize>,
    #[serde(default)]
    last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    changed_since_last_sync: Option<usize>,
    #[serde(default)]
    remote: Option<String>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;

        let (raw, report) = match request_status(&home) {
            Ok(payload) => {
                let report: StatusReport = serde_json::from_value(payload.clone())
                    .context("unexpected daemon status payload")?;
                (payload, report)
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let report = offline_report(&home)?;
                let raw = serde_json::to_value(&report).context("failed to serialize status")?;
                (raw, report)
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&raw).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

/// Read state straight from disk. The in-memory status lives in the daemon,
/// so the last success is taken from the newest `last_synced_at`.
fn offline_report(home: &Path) -> Result<StatusReport> {
    let config = config::load_at(home).context("failed to load courtsync config")?;
    let orchestrator =
        build_orchestrator(home, &config).context("failed to open local sync state")?;

    let mut last_success: Option<DateTime<Utc>> = None;
    for &kind in EntityKind::all() {
        let rows = orchestrator
            .store()
            .fetch_all(kind)
            .with_context(|| format!("failed to read local {kind} rows"))?;
        for row in rows {
            if let Some(at) = row.meta().last_synced_at {
                last_success = Some(last_success.map_or(at, |best| best.max(at)));
            }
        }
    }

    let changed_since_last_sync = match last_success {
        Some(at) => Some(
            orchestrator
                .changed_since(at)
                .context("failed to count local edits")?,
        ),
        None => None,
    };

    Ok(StatusReport {
        running: false,
        describe: describe(&SyncStatus::Idle, last_success, Utc::now()),
        enabled: config.sync.enabled,
        online: None,
        pending_operations: orchestrator.queue().len(),
        dirty_entities: Some(
            orchestrator
                .dirty_count()
                .context("failed to count unsynced entities")?,
        ),
        last_success,
        changed_since_last_sync,
        remote: Some(config.remote.base_url),
    })
}

fn print_table(report: &StatusReport) {
    let daemon = if report.running {
        "running".green().to_string()
    } else {
        "not running".bright_black().to_string()
    };
    println!(
        "CourtSync v{} | daemon {} | {}",
        env!("CARGO_PKG_VERSION"),
        daemon,
        report.describe,
    );

    let opt = |value: Option<usize>| value.map_or("-".to_string(), |n| n.to_string());
    let rows = vec![
        StatusRow {
            field: "sync",
            value: if report.enabled { "enabled" } else { "disabled" }.to_string(),
        },
        StatusRow {
            field: "network",
            value: match report.online {
                Some(true) => "reachable".to_string(),
                Some(false) => "unreachable".to_string(),
                None => "-".to_string(),
            },
        },
        StatusRow {
            field: "remote",
            value: report.remote.clone().unwrap_or_else(|| "-".to_string()),
        },
        StatusRow {
            field: "last success",
            value: report
                .last_success
                .map_or("never".to_string(), |at| format_age(at, Utc::now())),
        },
        StatusRow {
            field: "pending operations",
            value: report.pending_operations.to_string(),
        },
        StatusRow {
            field: "unsynced entities",
            value: opt(report.dirty_entities),
        },
        StatusRow {
            field: "edited since last sync",
            value: opt(report.changed_since_last_sync),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.pending_operations > 0 || report.dirty_entities.unwrap_or(0) > 0 {
        println!("Run 'courtsync sync' to push unsynced changes.");
    }
}
