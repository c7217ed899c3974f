//! CLI argument definitions for Strongroom.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! startup.

use std::path::PathBuf;

use clap::Parser;

/// Strongroom -- a local multi-user credential vault.
#[derive(Parser, Debug)]
#[command(
    name = "strongroom",
    version,
    about = "Strongroom -- local multi-user credential vault",
    long_about = "Stores credentials encrypted with a key derived from each user's master \
                  password. Opens an interactive shell; type `help` for commands."
)]
pub struct Cli {
    /// Configuration file. Missing files fall back to built-in defaults.
    #[arg(long, short, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Database file, overriding `database.path` from the configuration.
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["strongroom"]);
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        assert!(cli.db.is_none());
    }

    #[test]
    fn db_override() {
        let cli = Cli::parse_from(["strongroom", "--db", "/tmp/x.db", "-c", "my.toml"]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(cli.config, PathBuf::from("my.toml"));
    }

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
