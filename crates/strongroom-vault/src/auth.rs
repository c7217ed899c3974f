//! Authentication gate: registration, login, logout and password change.
//!
//! Login passwords are checked against an argon2id PHC hash that has its own
//! salt and nothing to do with encryption. Once the hash matches, the
//! session key is derived from the same password with PBKDF2 and the user's
//! key-derivation salt (see [`crate::crypto::derive_key`]).
//!
//! ```text
//! Anonymous --login--> Authenticated(Session) --logout--> Anonymous
//! ```
//!
//! A [`Session`] is an explicit value. The front end owns it as
//! `Option<Session>` and passes `&Session` into every vault operation.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::config::CryptoConfig;
use crate::crypto::{self, SessionKey};
use crate::error::{Result, VaultError};
use crate::store::{User, UserDraft, UserRole};
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// Login hashing
// ---------------------------------------------------------------------------

/// Argon2id hasher for login passwords.
///
/// New hashes use the configured cost; verification reads the parameters
/// embedded in each PHC string, so older hashes keep working after the
/// configuration changes.
pub struct LoginHasher {
    argon2: Argon2<'static>,
}

impl LoginHasher {
    pub fn new(config: &CryptoConfig) -> Result<Self> {
        let params = Params::new(
            config.hash_memory_kib,
            config.hash_iterations,
            config.hash_parallelism,
            None,
        )
        .map_err(|e| VaultError::PasswordHash {
            reason: format!("invalid argon2 parameters: {e}"),
        })?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash `password` into a PHC string with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; 16];
        SystemRandom::new()
            .fill(&mut salt_bytes)
            .map_err(|_| VaultError::PasswordHash {
                reason: "failed to generate hash salt".into(),
            })?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| VaultError::PasswordHash {
            reason: e.to_string(),
        })?;

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| VaultError::PasswordHash {
                reason: e.to_string(),
            })?;
        Ok(hash.to_string())
    }

    /// Check `password` against a stored PHC string.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::PasswordHash`] if the stored hash is malformed.
    pub fn verify(&self, password: &str, phc: &str) -> Result<bool> {
        let parsed = PasswordHash::new(phc).map_err(|e| VaultError::PasswordHash {
            reason: e.to_string(),
        })?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(VaultError::PasswordHash {
                reason: e.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An authenticated user and their in-memory session key.
///
/// Only [`Vault::login`] and [`Vault::change_password`] create sessions. The
/// key is zeroized when the session is dropped.
#[derive(Debug)]
pub struct Session {
    user_id: i64,
    username: String,
    role: UserRole,
    key: SessionKey,
    must_change_password: bool,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    /// Set for the bootstrap admin until the first password change.
    pub fn must_change_password(&self) -> bool {
        self.must_change_password
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn key(&self) -> &SessionKey {
        &self.key
    }
}

/// Outcome of [`Vault::change_password`].
#[derive(Debug)]
pub struct PasswordChange {
    /// Replacement session carrying the key derived from the new password.
    pub session: Session,
    /// Secrets re-encrypted under the new key.
    pub reencrypted: usize,
    /// Secrets that did not decrypt under the old key and were left as is.
    pub undecryptable: usize,
}

// ---------------------------------------------------------------------------
// Gate operations
// ---------------------------------------------------------------------------

impl Vault {
    /// Self-registration. New accounts always get the `user` role.
    ///
    /// # Errors
    ///
    /// [`VaultError::DuplicateUsername`] if the name is taken or belonged to
    /// a deleted account,
    /// [`VaultError::InvalidArgument`] for an empty username or password.
    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        self.create_account(username, password, UserRole::User, false)
    }

    pub(crate) fn create_account(
        &self,
        username: &str,
        password: &str,
        role: UserRole,
        must_change_password: bool,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(VaultError::InvalidArgument("username must not be empty".into()));
        }
        if password.is_empty() {
            return Err(VaultError::InvalidArgument("password must not be empty".into()));
        }
        if self.store().find_user(username)?.is_some()
            || self.store().is_username_retired(username)?
        {
            return Err(VaultError::DuplicateUsername {
                username: username.to_string(),
            });
        }

        let password_hash = self.hasher().hash(password)?;
        let salt = crypto::generate_salt()?;
        self.store().insert_user(&UserDraft {
            username,
            password_hash: &password_hash,
            role,
            kdf_salt: Some(&salt),
            kdf_iterations: self.config().crypto.kdf_iterations,
            must_change_password,
        })?;

        tracing::info!(user = username, role = %role, "user account created");
        self.store().require_user(username)
    }

    /// Authenticate and derive the session key.
    ///
    /// Unknown users and wrong passwords fail identically, and an unknown
    /// user still costs one argon2 verification. Rows from before per-user
    /// salts get one generated here.
    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let username = username.trim();
        let Some(user) = self.store().find_user(username)? else {
            let _ = self.hasher().verify(password, self.dummy_hash());
            tracing::info!(user = username, "login failed");
            return Err(VaultError::InvalidCredentials);
        };

        let valid = self
            .hasher()
            .verify(password, &user.password_hash)
            .unwrap_or_else(|e| {
                tracing::error!(user = username, error = %e, "stored password hash is unreadable");
                false
            });
        if !valid {
            tracing::info!(user = username, "login failed");
            return Err(VaultError::InvalidCredentials);
        }

        let (mut salt, iterations) = match user.kdf_salt {
            Some(salt) => (salt, user.kdf_iterations),
            None => {
                let salt = crypto::generate_salt()?;
                let iterations = self.config().crypto.kdf_iterations;
                self.store().set_kdf_salt(user.id, &salt, iterations)?;
                tracing::info!(user = username, "backfilled key-derivation salt for legacy account");
                (salt.to_vec(), iterations)
            }
        };
        let key = crypto::derive_key(password, &salt, iterations);
        salt.zeroize();

        self.store().touch_last_login(user.id)?;

        if user.must_change_password {
            tracing::warn!(user = username, "password change required before continuing");
        }
        tracing::info!(user = username, role = %user.role, "login succeeded");

        Ok(Session {
            user_id: user.id,
            username: user.username,
            role: user.role,
            key,
            must_change_password: user.must_change_password,
            started_at: Utc::now(),
        })
    }

    /// End a session. The session key is zeroized as the value drops.
    pub fn logout(&self, session: Session) {
        tracing::info!(user = session.username(), "logged out");
        drop(session);
    }

    /// Change the session user's password.
    ///
    /// Re-hashes the login password, rotates the key-derivation salt and
    /// re-encrypts, in one transaction, every secret the user created that
    /// decrypts under the current key. Secrets that were already
    /// undecryptable are left untouched and counted in the result.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidCredentials`] if `current` is wrong,
    /// [`VaultError::InvalidArgument`] if `new` is empty or unchanged.
    pub fn change_password(
        &self,
        session: &Session,
        current: &str,
        new: &str,
    ) -> Result<PasswordChange> {
        if new.is_empty() {
            return Err(VaultError::InvalidArgument("new password must not be empty".into()));
        }
        if new == current {
            return Err(VaultError::InvalidArgument(
                "new password must differ from the current one".into(),
            ));
        }

        let user = self.store().require_user(session.username())?;
        if !self.hasher().verify(current, &user.password_hash)? {
            tracing::info!(user = session.username(), "password change rejected");
            return Err(VaultError::InvalidCredentials);
        }

        let password_hash = self.hasher().hash(new)?;
        let salt = crypto::generate_salt()?;
        let iterations = self.config().crypto.kdf_iterations;
        let new_key = crypto::derive_key(new, &salt, iterations);

        let mut reencrypted = 0;
        let mut undecryptable = 0;

        let tx = self.store().connection().unchecked_transaction()?;
        for (id, payload) in self.store().payloads_created_by(session.username())? {
            match crypto::decrypt(&payload, session.key()) {
                Ok(mut plaintext) => {
                    let token = crypto::encrypt(&plaintext, &new_key);
                    plaintext.zeroize();
                    self.store().rewrap_payload(id, &token?)?;
                    reencrypted += 1;
                }
                Err(VaultError::DecryptionFailed { .. }) => undecryptable += 1,
                Err(e) => return Err(e),
            }
        }
        self.store()
            .set_credentials(user.id, &password_hash, &salt, iterations)?;
        tx.commit()?;

        tracing::info!(
            user = session.username(),
            reencrypted,
            undecryptable,
            "password changed"
        );

        Ok(PasswordChange {
            session: Session {
                user_id: user.id,
                username: user.username,
                role: user.role,
                key: new_key,
                must_change_password: false,
                started_at: Utc::now(),
            },
            reencrypted,
            undecryptable,
        })
    }

    /// Seed the configured admin account when no admin exists.
    ///
    /// Returns whether an account was created.
    pub(crate) fn ensure_default_admin(&self) -> Result<bool> {
        if self.store().count_admins()? > 0 {
            return Ok(false);
        }

        let bootstrap = &self.config().bootstrap;
        if self.store().find_user(&bootstrap.admin_username)?.is_some()
            || self.store().is_username_retired(&bootstrap.admin_username)?
        {
            tracing::warn!(
                user = %bootstrap.admin_username,
                "no admin account exists and the bootstrap username is unavailable; skipping bootstrap"
            );
            return Ok(false);
        }

        self.create_account(
            &bootstrap.admin_username,
            &bootstrap.admin_password,
            UserRole::Admin,
            true,
        )?;
        tracing::warn!(
            user = %bootstrap.admin_username,
            "created default admin account with the bootstrap password; change it at first login"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;

    fn vault() -> Vault {
        Vault::open_in_memory(VaultConfig::for_tests()).unwrap()
    }

    fn hasher() -> LoginHasher {
        LoginHasher::new(&VaultConfig::for_tests().crypto).unwrap()
    }

    #[test]
    fn hash_is_phc_argon2id_and_salted() {
        let hasher = hasher();
        let a = hasher.hash("hunter2").unwrap();
        let b = hasher.hash("hunter2").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
        assert!(hasher.verify("hunter2", &a).unwrap());
        assert!(!hasher.verify("hunter3", &a).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let err = hasher().verify("pw", "not-a-phc-string").unwrap_err();
        assert!(matches!(err, VaultError::PasswordHash { .. }));
    }

    #[test]
    fn invalid_cost_parameters_are_rejected() {
        let config = CryptoConfig {
            hash_memory_kib: 1,
            ..VaultConfig::for_tests().crypto
        };
        assert!(LoginHasher::new(&config).is_err());
    }

    #[test]
    fn register_then_login() {
        let vault = vault();
        let user = vault.register("alice", "pw-alice").unwrap();
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.kdf_salt.as_ref().map(Vec::len), Some(crypto::SALT_LEN));
        assert!(!user.must_change_password);

        let session = vault.login("alice", "pw-alice").unwrap();
        assert_eq!(session.username(), "alice");
        assert_eq!(session.role(), UserRole::User);

        let reloaded = vault.store().require_user("alice").unwrap();
        assert!(reloaded.last_login.is_some());
    }

    #[test]
    fn register_validates_input() {
        let vault = vault();
        assert!(matches!(
            vault.register("  ", "pw"),
            Err(VaultError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.register("alice", ""),
            Err(VaultError::InvalidArgument(_))
        ));
        vault.register("alice", "pw").unwrap();
        assert!(matches!(
            vault.register("alice", "other"),
            Err(VaultError::DuplicateUsername { .. })
        ));
    }

    #[test]
    fn login_failures_are_indistinguishable() {
        let vault = vault();
        vault.register("alice", "right").unwrap();

        let wrong = vault.login("alice", "wrong").unwrap_err();
        let unknown = vault.login("nobody", "wrong").unwrap_err();
        assert!(matches!(wrong, VaultError::InvalidCredentials));
        assert!(matches!(unknown, VaultError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn same_password_gives_same_key_across_logins() {
        let vault = vault();
        vault.register("alice", "pw").unwrap();
        let first = vault.login("alice", "pw").unwrap();
        let second = vault.login("alice", "pw").unwrap();
        assert_eq!(first.key(), second.key());
    }

    #[test]
    fn users_with_same_password_get_different_keys() {
        let vault = vault();
        vault.register("alice", "shared").unwrap();
        vault.register("bob", "shared").unwrap();
        let a = vault.login("alice", "shared").unwrap();
        let b = vault.login("bob", "shared").unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn bootstrap_admin_is_seeded_once() {
        let vault = vault();
        let admin = vault.store().require_user("admin").unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.must_change_password);
        assert!(!vault.ensure_default_admin().unwrap());
        assert_eq!(vault.store().count_admins().unwrap(), 1);

        let session = vault.login("admin", "admin123").unwrap();
        assert!(session.must_change_password());
    }

    #[test]
    fn change_password_clears_flag_and_rotates_salt() {
        let vault = vault();
        let session = vault.login("admin", "admin123").unwrap();
        let old_salt = vault.store().require_user("admin").unwrap().kdf_salt;

        let change = vault
            .change_password(&session, "admin123", "n3w-strong")
            .unwrap();
        assert!(!change.session.must_change_password());
        assert_ne!(change.session.key(), session.key());

        let user = vault.store().require_user("admin").unwrap();
        assert!(!user.must_change_password);
        assert_ne!(user.kdf_salt, old_salt);

        assert!(matches!(
            vault.login("admin", "admin123"),
            Err(VaultError::InvalidCredentials)
        ));
        let again = vault.login("admin", "n3w-strong").unwrap();
        assert_eq!(again.key(), change.session.key());
    }

    #[test]
    fn change_password_requires_current_password() {
        let vault = vault();
        vault.register("alice", "pw").unwrap();
        let session = vault.login("alice", "pw").unwrap();
        assert!(matches!(
            vault.change_password(&session, "nope", "new"),
            Err(VaultError::InvalidCredentials)
        ));
        assert!(matches!(
            vault.change_password(&session, "pw", "pw"),
            Err(VaultError::InvalidArgument(_))
        ));
    }
}
