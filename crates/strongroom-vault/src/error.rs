//! Vault error types.
//!
//! All vault subsystems surface errors through [`VaultError`], which is the
//! single error type returned by every public API in this crate.  The first
//! group of variants are the user-facing conditions a front end is expected to
//! recover from and show inline; the rest are infrastructure failures.

/// Unified error type for the Strongroom credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- User-facing --------------------------------------------------------
    /// Registration with a username that is already taken.
    #[error("username already exists: {username}")]
    DuplicateUsername { username: String },

    /// Wrong username or password.  Deliberately does not say which.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// A stored secret could not be verified or opened with the session key.
    ///
    /// Expected for secrets written under a since-changed master password, by
    /// another user, or before the per-user salt existed.  The recovery path
    /// is to overwrite the value (see `Vault::recreate_secret_value`).
    #[error("secret cannot be decrypted with the current session key: {reason}")]
    DecryptionFailed { reason: String },

    /// The session's role does not allow the attempted operation.
    #[error("permission denied: {action}")]
    PermissionDenied { action: String },

    /// Attempt to save a secret with no value.
    #[error("secret value must not be empty")]
    EmptySecretValue,

    /// The referenced secret does not exist.
    #[error("secret not found: id={id}")]
    SecretNotFound { id: i64 },

    /// The referenced user does not exist.
    #[error("user not found: {username}")]
    UserNotFound { username: String },

    /// An invalid argument was provided (empty title, unknown role, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Crypto -------------------------------------------------------------
    /// Encryption failed (CSPRNG failure, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Hashing or parsing a login password hash failed.
    #[error("password hashing failed: {reason}")]
    PasswordHash { reason: String },

    // -- Infrastructure -----------------------------------------------------
    /// Database schema migration failed.
    #[error("migration v{version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Whether the error is an expected outcome of a user action that the
    /// caller should report inline and carry on from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateUsername { .. }
                | Self::InvalidCredentials
                | Self::DecryptionFailed { .. }
                | Self::PermissionDenied { .. }
                | Self::EmptySecretValue
                | Self::SecretNotFound { .. }
                | Self::UserNotFound { .. }
                | Self::InvalidArgument(_)
        )
    }

    pub(crate) fn denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
