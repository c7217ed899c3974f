//! Credential vault core for Strongroom.
//!
//! Secrets are encrypted at rest with AES-256-GCM under a per-user session
//! key. The key is derived with PBKDF2-HMAC-SHA256 from the master password
//! and a random per-user salt, lives only in memory and is never stored.
//! Login is gated by a separate argon2id password hash. A role model decides
//! which secrets a session may see and change, and every mutation lands in an
//! append-only audit trail.
//!
//! # Modules
//!
//! - [`crypto`]: key derivation, secret cipher, password generator.
//! - [`auth`]: login hashing, sessions, register/login/logout/password change.
//! - [`policy`]: role-based authorization rules.
//! - [`audit`]: `secrets_history` append and queries.
//! - [`store`]: SQLite persistence and row types.
//! - [`migration`]: versioned schema migrations.
//! - [`vault`]: the session-scoped service front ends call.
//! - [`config`]: TOML configuration with defaults.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use strongroom_vault::{NewSecret, SecretFilter, SecretUpdate, Vault, VaultConfig};
//!
//! # fn example() -> strongroom_vault::Result<()> {
//! let vault = Vault::open(VaultConfig::default())?;
//! vault.register("alice", "correct horse")?;
//! let session = vault.login("alice", "correct horse")?;
//!
//! let id = vault.create_secret(
//!     &session,
//!     NewSecret::new("GitHub", "gh-pass").with_login("alice").with_category("Work"),
//! )?;
//! vault.update_secret(&session, id, SecretUpdate::value("rotated"))?;
//!
//! for secret in vault.list_secrets(&session, &SecretFilter::search("git"))? {
//!     println!("{} {}", secret.id, secret.title);
//! }
//! vault.delete_secret(&session, id, |_| true)?;
//! vault.logout(session);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod migration;
pub mod policy;
pub mod store;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use audit::{AuditAction, AuditEntry};
pub use auth::{PasswordChange, Session};
pub use config::VaultConfig;
pub use crypto::{SessionKey, generate_password};
pub use error::{Result, VaultError};
pub use store::{
    PermissionGrant, SUGGESTED_CATEGORIES, SecretFilter, SecretSummary, User, UserRole,
    UserSummary, Visibility,
};
pub use vault::{NewSecret, OpenedSecret, SecretUpdate, Vault, VaultStats};
