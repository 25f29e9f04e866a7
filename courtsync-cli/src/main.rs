//! CourtSync: offline-first sync for team rosters, schedules and announcements.
//!
//! # Usage
//!
//! ```text
//! courtsync init --remote-url <URL> [--api-key K] [--access-token T] [--interval-secs N] [--disabled] [--force]
//! courtsync sync [--json]
//! courtsync status [--json]
//! courtsync queue [--json]
//! courtsync enable | disable
//! courtsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, queue::QueueArgs, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "courtsync",
    version,
    about = "Keep a local team dataset in sync with the remote store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.courtsync/config.yaml.
    Init(InitArgs),

    /// Run one sync cycle (through the daemon when it is running).
    Sync(SyncArgs),

    /// Show sync state, pending operations and unsynced edits.
    Status(StatusArgs),

    /// List operations waiting to be replayed.
    Queue(QueueArgs),

    /// Turn background sync on.
    Enable,

    /// Turn background sync off. Local edits are still saved and queued.
    Disable,

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Queue(args) => args.run(),
        Commands::Enable => commands::toggle::run(true),
        Commands::Disable => commands::toggle::run(false),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
