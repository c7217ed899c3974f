//! Vault configuration (`config/default.toml`).
//!
//! Every field has a serde default, so a missing file or a partial file both
//! load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding the vault.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Cost parameters for key derivation and login hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for newly derived salts. Existing users keep the
    /// count stored with their salt.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// Argon2id memory cost in KiB.
    #[serde(default = "default_hash_memory_kib")]
    pub hash_memory_kib: u32,
    /// Argon2id time cost.
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
    /// Argon2id lanes.
    #[serde(default = "default_hash_parallelism")]
    pub hash_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
            hash_memory_kib: default_hash_memory_kib(),
            hash_iterations: default_hash_iterations(),
            hash_parallelism: default_hash_parallelism(),
        }
    }
}

/// Account seeded when the database has no admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_password: default_admin_password(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("strongroom.db")
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_hash_memory_kib() -> u32 {
    19_456
}

fn default_hash_iterations() -> u32 {
    2
}

fn default_hash_parallelism() -> u32 {
    1
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl VaultConfig {
    /// Load config from a path. Returns the default config if the file
    /// doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Cheap cost parameters so tests don't spend seconds hashing.
    pub fn for_tests() -> Self {
        Self {
            crypto: CryptoConfig {
                kdf_iterations: 1_000,
                hash_memory_kib: 64,
                hash_iterations: 1,
                hash_parallelism: 1,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = VaultConfig::default();
        assert_eq!(config.database.path, PathBuf::from("strongroom.db"));
        assert_eq!(config.crypto.kdf_iterations, 100_000);
        assert_eq!(config.crypto.hash_memory_kib, 19_456);
        assert_eq!(config.bootstrap.admin_username, "admin");
        assert_eq!(config.bootstrap.admin_password, "admin123");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = VaultConfig::parse(
            r#"
            [database]
            path = "/tmp/vault.db"

            [crypto]
            kdf_iterations = 200000
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/vault.db"));
        assert_eq!(config.crypto.kdf_iterations, 200_000);
        assert_eq!(config.crypto.hash_iterations, 2);
        assert_eq!(config.bootstrap, BootstrapConfig::default());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = VaultConfig::parse("[crypto]\nkdf_iterations = \"many\"").unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, VaultConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strongroom.toml");
        fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
    }
}
