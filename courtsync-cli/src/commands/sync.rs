//! `courtsync sync`: run one cycle now.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use courtsync_core::config;
use courtsync_daemon::{
    build_orchestrator, init_tracing, request_sync, CycleSummary, DaemonError, EngineLock,
};
use courtsync_sync::{CycleOutcome, CycleResult};

/// Arguments for `courtsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;

        let (via, outcome) = match request_sync(&home) {
            Ok(data) => {
                let summary: CycleSummary =
                    serde_json::from_value(data).context("unexpected daemon sync response")?;
                ("daemon", summary.outcome)
            }
            Err(DaemonError::DaemonNotRunning { .. }) => ("local", run_in_process(&home)?),
            Err(err) => return Err(err).context("daemon sync request failed"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to serialize sync JSON")?
            );
        } else {
            print_outcome(via, &outcome);
        }

        if let CycleOutcome::Aborted { error, .. } = &outcome {
            bail!("sync failed: {error}");
        }
        Ok(())
    }
}

/// One cycle against the file-backed engine when no daemon owns it. Another
/// process holding the engine lock means a cycle is already in progress.
fn run_in_process(home: &Path) -> Result<CycleOutcome> {
    init_tracing("warn");
    let config = config::load_at(home).context("failed to load courtsync config")?;
    let _lock = match EngineLock::acquire(home) {
        Ok(lock) => lock,
        Err(DaemonError::AlreadyRunning { .. }) => return Ok(CycleOutcome::AlreadyRunning),
        Err(err) => return Err(err).context("failed to take the engine lock"),
    };
    let orchestrator =
        build_orchestrator(home, &config).context("failed to open local sync state")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(orchestrator.run_cycle()))
}

fn print_outcome(via: &str, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Completed(result) => {
            println!("{} sync completed ({via})", "✓".green());
            print_counts(result);
        }
        CycleOutcome::Aborted { result, error } => {
            println!("{} sync failed ({via}): {error}", "✗".red());
            print_counts(result);
            println!("  Unsynced changes are kept and will be retried.");
        }
        CycleOutcome::AlreadyRunning => {
            println!("{} a sync cycle is already running", "…".yellow());
        }
        CycleOutcome::Disabled => {
            println!(
                "{} sync is disabled; run 'courtsync enable' to turn it on",
                "○".bright_black()
            );
        }
    }
}

fn print_counts(result: &CycleResult) {
    println!(
        "  replayed {} · pushed {} · pulled {} · removed {} · {}ms",
        result.replayed, result.pushed, result.pulled, result.removed, result.duration_ms
    );
    for failure in &result.failures {
        println!(
            "  {} {:?} {}: {}",
            "!".yellow(),
            failure.phase,
            failure.entity,
            failure.error
        );
    }
}
