//! `courtsync init --remote-url <URL> [...]`

use anyhow::{Context, Result};
use clap::Args;

use courtsync_core::config::{self, Config};

/// Write the CourtSync config file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Base URL of the remote store (e.g. https://xyz.supabase.co).
    #[arg(long, value_name = "URL")]
    pub remote_url: String,

    /// Project API key sent as the `apikey` header.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Bearer token for an authenticated session.
    #[arg(long)]
    pub access_token: Option<String>,

    /// Seconds between scheduled cycles.
    #[arg(long, value_name = "N")]
    pub interval_secs: Option<u64>,

    /// Start with background sync turned off.
    #[arg(long)]
    pub disabled: bool,

    /// Overwrite an existing config.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;

        let mut config = Config::new(self.remote_url);
        config.remote.api_key = self.api_key;
        config.remote.access_token = self.access_token;
        if let Some(secs) = self.interval_secs {
            config.sync.interval_secs = secs;
        }
        config.sync.enabled = !self.disabled;
        config.validate().context("invalid configuration")?;

        let existed = config::config_path_at(&home).exists();
        let written = config::init_at(&home, config, self.force)
            .context("failed to write courtsync config")?;

        if existed && !self.force {
            println!(
                "✓ Config already exists at {} (use --force to overwrite)",
                config::config_path_at(&home).display()
            );
        } else {
            println!("✓ Wrote {}", config::config_path_at(&home).display());
        }
        println!("  remote:   {}", written.remote.base_url);
        println!(
            "  sync:     {} (every {}s)",
            if written.sync.enabled { "enabled" } else { "disabled" },
            written.sync.interval_secs
        );
        Ok(())
    }
}
