//! CLI entry point for Strongroom.
//!
//! Loads the configuration, opens the vault and hands control to the
//! interactive shell. Only startup failures end the process; errors from
//! individual commands are reported by the shell and it carries on.

mod cli;
mod handlers;
mod helpers;
mod shell;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use strongroom_vault::{Vault, VaultConfig};

use crate::cli::Cli;
use crate::helpers::init_tracing;
use crate::shell::Shell;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VaultConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    init_tracing(&config.logging.level);
    info!(config = %cli.config.display(), "starting strongroom");

    let db_path = config.database.path.clone();
    let vault = Vault::open(config)
        .with_context(|| format!("failed to open vault at {}", db_path.display()))?;
    info!(path = %db_path.display(), "vault opened");

    Shell::new(vault).run()
}
