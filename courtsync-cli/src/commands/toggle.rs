//! `courtsync enable` / `courtsync disable`

use anyhow::{Context, Result};

use courtsync_core::config;
use courtsync_daemon::{request_set_enabled, DaemonError};

pub fn run(enabled: bool) -> Result<()> {
    let home = super::home_dir()?;
    let word = if enabled { "enabled" } else { "disabled" };

    match request_set_enabled(&home, enabled) {
        // The daemon persists the flag itself.
        Ok(_) => println!("✓ Sync {word} (daemon updated)"),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            config::set_enabled_at(&home, enabled)
                .with_context(|| format!("failed to mark sync {word}"))?;
            println!("✓ Sync {word}");
        }
        Err(err) => return Err(err).with_context(|| format!("failed to mark sync {word}")),
    }
    Ok(())
}
