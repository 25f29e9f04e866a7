pub mod daemon;
pub mod init;
pub mod queue;
pub mod status;
pub mod sync;
pub mod toggle;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
