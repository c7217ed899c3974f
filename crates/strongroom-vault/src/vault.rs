//! The vault service: session-scoped operations invoked by front ends.
//!
//! [`Vault`] composes the store, cipher, policy and audit log. Every
//! operation takes the caller's [`Session`] explicitly. The order inside each
//! mutation is always the same: load, authorize, validate, write, audit.
//! A rejected or cancelled operation writes nothing and records nothing.
//!
//! Authentication lives in [`crate::auth`] as further `impl Vault` blocks.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::audit::{self, AuditAction, AuditEntry, AuditLog, MASKED};
use crate::auth::{LoginHasher, Session};
use crate::config::VaultConfig;
use crate::crypto;
use crate::error::{Result, VaultError};
use crate::policy::{self, Operation};
use crate::store::{
    DEFAULT_CATEGORY, PermissionGrant, SecretDraft, SecretFilter, SecretSummary, Store, User,
    UserRole, UserSummary, Visibility,
};

/// Window used by [`Vault::statistics`] for recent activity.
pub const RECENT_ACTIVITY_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Request and response types
// ---------------------------------------------------------------------------

/// Input for [`Vault::create_secret`].
#[derive(Clone, Default)]
pub struct NewSecret {
    pub title: String,
    pub login: Option<String>,
    /// Plaintext value. Encrypted before it reaches the store.
    pub value: String,
    pub url: Option<String>,
    pub notes: Option<String>,
    /// Defaults to `General` when `None` or blank.
    pub category: Option<String>,
    pub visibility: Visibility,
}

impl NewSecret {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn restricted(mut self) -> Self {
        self.visibility = Visibility::Restricted;
        self
    }
}

impl std::fmt::Debug for NewSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewSecret")
            .field("title", &self.title)
            .field("login", &self.login)
            .field("value", &"<redacted>")
            .field("url", &self.url)
            .field("category", &self.category)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// Changes for [`Vault::update_secret`]. `None` leaves a field as it is;
/// an empty string clears an optional field.
#[derive(Clone, Default)]
pub struct SecretUpdate {
    pub title: Option<String>,
    pub login: Option<String>,
    pub value: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub category: Option<String>,
    pub visibility: Option<Visibility>,
}

impl SecretUpdate {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for SecretUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretUpdate")
            .field("title", &self.title)
            .field("login", &self.login)
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .field("url", &self.url)
            .field("notes", &self.notes)
            .field("category", &self.category)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// A secret's metadata together with its decrypted value.
pub struct OpenedSecret {
    pub secret: SecretSummary,
    value: String,
}

impl OpenedSecret {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for OpenedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSecret")
            .field("secret", &self.secret)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl Drop for OpenedSecret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Counts shown on the admin statistics screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub total_secrets: i64,
    pub total_users: i64,
    /// Audit entries in the last [`RECENT_ACTIVITY_DAYS`] days.
    pub recent_changes: i64,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// The credential vault service.
///
/// # Example
///
/// ```rust,no_run
/// # use strongroom_vault::{NewSecret, SecretFilter, Vault, VaultConfig};
/// # fn example() -> strongroom_vault::Result<()> {
/// let vault = Vault::open(VaultConfig::default())?;
/// vault.register("alice", "correct horse")?;
///
/// let session = vault.login("alice", "correct horse")?;
/// let id = vault.create_secret(&session, NewSecret::new("Mail", "s3cret"))?;
///
/// let opened = vault.open_secret(&session, id)?;
/// assert_eq!(opened.value(), "s3cret");
/// assert_eq!(vault.list_secrets(&session, &SecretFilter::default())?.len(), 1);
///
/// vault.logout(session);
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    store: Store,
    config: VaultConfig,
    hasher: LoginHasher,
    /// Verified against for unknown usernames so that login timing does not
    /// reveal which accounts exist.
    dummy_hash: String,
}

impl Vault {
    /// Open the database named in `config`, run migrations and seed the
    /// bootstrap admin if needed.
    pub fn open(config: VaultConfig) -> Result<Self> {
        let store = Store::open(&config.database.path)?;
        Self::with_store(store, config)
    }

    /// Open an in-memory vault (useful for testing).
    pub fn open_in_memory(config: VaultConfig) -> Result<Self> {
        let store = Store::open_in_memory()?;
        Self::with_store(store, config)
    }

    fn with_store(store: Store, config: VaultConfig) -> Result<Self> {
        let hasher = LoginHasher::new(&config.crypto)?;
        let dummy_hash = hasher.hash("strongroom-timing-equalizer")?;
        let vault = Self {
            store,
            config,
            hasher,
            dummy_hash,
        };
        vault.ensure_default_admin()?;
        Ok(vault)
    }

    /// Storage layer without authorization; crate-internal only.
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub(crate) fn hasher(&self) -> &LoginHasher {
        &self.hasher
    }

    pub(crate) fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }

    fn audit(&self) -> AuditLog<'_> {
        AuditLog::new(self.store.connection())
    }

    /// Append an audit entry. A failed append is logged, not propagated: the
    /// mutation it describes has already been committed.
    fn record(
        &self,
        secret_id: i64,
        action: AuditAction,
        actor: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) {
        if let Err(e) = self
            .audit()
            .append(secret_id, action, actor, old_value, new_value)
        {
            tracing::error!(
                secret_id = secret_id,
                action = %action,
                error = %e,
                "failed to append audit entry"
            );
        }
    }

    // -- Secrets ------------------------------------------------------------

    /// Encrypt and store a new secret owned by the session user.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidArgument`] for a blank title,
    /// [`VaultError::EmptySecretValue`] for an empty value,
    /// [`VaultError::PermissionDenied`] if a non-admin asks for `restricted`.
    pub fn create_secret(&self, session: &Session, secret: NewSecret) -> Result<i64> {
        let title = secret.title.trim();
        if title.is_empty() {
            return Err(VaultError::InvalidArgument("title must not be empty".into()));
        }
        if secret.value.is_empty() {
            return Err(VaultError::EmptySecretValue);
        }
        if secret.visibility == Visibility::Restricted {
            policy::authorize(session, Operation::SetRestricted)?;
        }

        let payload = crypto::encrypt(&secret.value, session.key())?;
        let category = normalize(secret.category.as_deref()).unwrap_or(DEFAULT_CATEGORY);

        let id = self.store.insert_secret(&SecretDraft {
            title,
            login: normalize(secret.login.as_deref()),
            payload: &payload,
            url: normalize(secret.url.as_deref()),
            notes: normalize(secret.notes.as_deref()),
            category,
            created_by: session.username(),
            visibility: secret.visibility,
        })?;

        self.record(
            id,
            AuditAction::Created,
            session.username(),
            None,
            Some(&audit::title_summary(title)),
        );
        tracing::info!(
            secret_id = id,
            user = session.username(),
            category = category,
            "secret created"
        );
        Ok(id)
    }

    /// Secrets visible to the session, most recently updated first.
    pub fn list_secrets(&self, session: &Session, filter: &SecretFilter) -> Result<Vec<SecretSummary>> {
        let secrets = self
            .store
            .query_secrets(policy::listing_owner(session), filter)?;
        Ok(secrets.iter().map(|s| s.summary()).collect())
    }

    /// Metadata of one secret.
    pub fn get_secret(&self, session: &Session, id: i64) -> Result<SecretSummary> {
        let secret = self.store.require_secret(id)?;
        policy::authorize_secret(session, Operation::ReadSecret, &secret)?;
        Ok(secret.summary())
    }

    /// Metadata plus decrypted value.
    ///
    /// # Errors
    ///
    /// [`VaultError::DecryptionFailed`] when the secret was written under a
    /// different key. Recover with [`Vault::recreate_secret_value`].
    pub fn open_secret(&self, session: &Session, id: i64) -> Result<OpenedSecret> {
        let secret = self.store.require_secret(id)?;
        policy::authorize_secret(session, Operation::ReadSecret, &secret)?;

        let value = crypto::decrypt(&secret.payload, session.key()).inspect_err(|e| {
            if matches!(e, VaultError::DecryptionFailed { .. }) {
                tracing::warn!(
                    secret_id = id,
                    user = session.username(),
                    "secret cannot be decrypted with the current session key"
                );
            }
        })?;

        tracing::debug!(secret_id = id, user = session.username(), "secret opened");
        Ok(OpenedSecret {
            secret: secret.summary(),
            value,
        })
    }

    /// Apply the changed fields of `update`.
    ///
    /// Returns `false`, writing nothing, when no field actually changes.
    /// Otherwise records exactly one audit entry: `PASSWORD_CHANGED` if the
    /// value changed (an undecryptable old value always counts as changed),
    /// else `DETAILS_UPDATED` listing the changed fields.
    ///
    /// A new value is encrypted under the editor's session key. When a
    /// manager or admin replaces the value of someone else's secret, the
    /// owner can no longer decrypt it and gets
    /// [`VaultError::DecryptionFailed`] until they recreate the value.
    pub fn update_secret(&self, session: &Session, id: i64, update: SecretUpdate) -> Result<bool> {
        let mut secret = self.store.require_secret(id)?;
        policy::authorize_secret(session, Operation::UpdateSecret, &secret)?;

        let mut changed: Vec<&'static str> = Vec::new();

        if let Some(title) = update.title.as_deref() {
            let title = title.trim();
            if title.is_empty() {
                return Err(VaultError::InvalidArgument("title must not be empty".into()));
            }
            if title != secret.title {
                secret.title = title.to_string();
                changed.push("title");
            }
        }
        if let Some(login) = update.login.as_deref() {
            if apply_optional(&mut secret.login, login) {
                changed.push("login");
            }
        }
        if let Some(url) = update.url.as_deref() {
            if apply_optional(&mut secret.url, url) {
                changed.push("url");
            }
        }
        if let Some(notes) = update.notes.as_deref() {
            if apply_optional(&mut secret.notes, notes) {
                changed.push("notes");
            }
        }
        if let Some(category) = update.category.as_deref() {
            let category = normalize(Some(category)).unwrap_or(DEFAULT_CATEGORY);
            if category != secret.category {
                secret.category = category.to_string();
                changed.push("category");
            }
        }
        if let Some(visibility) = update.visibility {
            if visibility != secret.visibility {
                policy::authorize(session, Operation::SetRestricted)?;
                secret.visibility = visibility;
                changed.push("visibility");
            }
        }

        let mut value_changed = false;
        if let Some(value) = update.value.as_deref() {
            if value.is_empty() {
                return Err(VaultError::EmptySecretValue);
            }
            let unchanged = match crypto::decrypt(&secret.payload, session.key()) {
                Ok(mut old) => {
                    let same = old == value;
                    old.zeroize();
                    same
                }
                Err(VaultError::DecryptionFailed { .. }) => false,
                Err(e) => return Err(e),
            };
            if !unchanged {
                secret.payload = crypto::encrypt(value, session.key())?;
                value_changed = true;
            }
        }

        if !value_changed && changed.is_empty() {
            tracing::debug!(secret_id = id, "update with no changes, nothing written");
            return Ok(false);
        }

        self.store.update_secret(&secret)?;

        if value_changed {
            self.record(
                id,
                AuditAction::PasswordChanged,
                session.username(),
                Some(MASKED),
                Some(MASKED),
            );
        } else {
            self.record(
                id,
                AuditAction::DetailsUpdated,
                session.username(),
                None,
                Some(&audit::fields_summary(&changed)),
            );
        }

        tracing::info!(
            secret_id = id,
            user = session.username(),
            value_changed,
            fields = %audit::fields_summary(&changed),
            "secret updated"
        );
        Ok(true)
    }

    /// Overwrite the value of a secret, typically one that no longer
    /// decrypts. Same semantics as an update of the value only.
    pub fn recreate_secret_value(&self, session: &Session, id: i64, value: &str) -> Result<bool> {
        self.update_secret(session, id, SecretUpdate::value(value))
    }

    /// Delete a secret after `confirm` approves it.
    ///
    /// Authorization happens before `confirm` is asked. Returns `false` if
    /// the confirmation is declined, in which case nothing is written.
    ///
    /// The `DELETED` audit entry is recorded first and kept; the secret's
    /// earlier history, its grants and the row itself are removed in the
    /// same transaction.
    pub fn delete_secret<F>(&self, session: &Session, id: i64, confirm: F) -> Result<bool>
    where
        F: FnOnce(&SecretSummary) -> bool,
    {
        let secret = self.store.require_secret(id)?;
        policy::authorize_secret(session, Operation::DeleteSecret, &secret)?;

        if !confirm(&secret.summary()) {
            tracing::debug!(secret_id = id, "deletion cancelled");
            return Ok(false);
        }

        let tx = self.store.connection().unchecked_transaction()?;
        let log = self.audit();
        let tombstone = log.append(
            id,
            AuditAction::Deleted,
            session.username(),
            Some(&audit::title_summary(&secret.title)),
            None,
        )?;
        let purged = log.purge_except(id, tombstone)?;
        self.store.delete_secret(id)?;
        tx.commit()?;

        tracing::info!(
            secret_id = id,
            user = session.username(),
            purged_history = purged,
            "secret deleted"
        );
        Ok(true)
    }

    /// Audit trail of one secret, most recent first.
    pub fn history(&self, session: &Session, id: i64) -> Result<Vec<AuditEntry>> {
        let secret = self.store.require_secret(id)?;
        policy::authorize_secret(session, Operation::ReadSecret, &secret)?;
        self.audit().history(id)
    }

    /// Visible secrets that do not decrypt under the session key.
    pub fn check_integrity(&self, session: &Session) -> Result<Vec<SecretSummary>> {
        let secrets = self
            .store
            .query_secrets(policy::listing_owner(session), &SecretFilter::default())?;

        let broken: Vec<SecretSummary> = secrets
            .iter()
            .filter(|s| crypto::decrypt(&s.payload, session.key()).is_err())
            .map(|s| s.summary())
            .collect();

        tracing::info!(
            user = session.username(),
            checked = secrets.len(),
            undecryptable = broken.len(),
            "integrity check finished"
        );
        Ok(broken)
    }

    // -- Grants -------------------------------------------------------------

    /// Record that `username` may use secret `id`. Replaces any previous
    /// grant for the pair.
    pub fn grant_access(&self, session: &Session, id: i64, username: &str, level: i64) -> Result<()> {
        policy::authorize(session, Operation::ManageGrants)?;
        if level < 1 {
            return Err(VaultError::InvalidArgument(format!(
                "permission level must be at least 1, got {level}"
            )));
        }
        self.store.require_secret(id)?;
        let user = self.store.require_user(username)?;

        self.store
            .upsert_grant(user.id, id, level, session.username())?;
        tracing::info!(
            secret_id = id,
            grantee = username,
            level,
            granted_by = session.username(),
            "access granted"
        );
        Ok(())
    }

    /// Remove a grant. Returns whether one existed.
    pub fn revoke_access(&self, session: &Session, id: i64, username: &str) -> Result<bool> {
        policy::authorize(session, Operation::ManageGrants)?;
        self.store.require_secret(id)?;
        let user = self.store.require_user(username)?;

        let revoked = self.store.delete_grant(user.id, id)?;
        if revoked {
            tracing::info!(secret_id = id, grantee = username, "access revoked");
        }
        Ok(revoked)
    }

    pub fn list_grants(&self, session: &Session, id: i64) -> Result<Vec<PermissionGrant>> {
        policy::authorize(session, Operation::ManageGrants)?;
        self.store.require_secret(id)?;
        self.store.grants_for(id)
    }

    // -- Users --------------------------------------------------------------

    pub fn list_users(&self, session: &Session) -> Result<Vec<UserSummary>> {
        policy::authorize(session, Operation::ManageUsers)?;
        self.store.list_users()
    }

    /// Create an account with any role. The user is asked to pick their own
    /// password at first login.
    pub fn create_user(
        &self,
        session: &Session,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User> {
        policy::authorize(session, Operation::ManageUsers)?;
        let user = self.create_account(username, password, role, true)?;
        tracing::info!(
            user = %user.username,
            role = %role,
            created_by = session.username(),
            "account created by admin"
        );
        Ok(user)
    }

    /// Change another user's role. Returns `false` if the role is unchanged.
    pub fn change_role(&self, session: &Session, username: &str, role: UserRole) -> Result<bool> {
        policy::authorize(session, Operation::ManageUsers)?;
        if username.trim() == session.username() {
            return Err(VaultError::denied("change own role"));
        }
        let user = self.store.require_user(username.trim())?;
        if user.role == role {
            return Ok(false);
        }

        self.store.set_role(user.id, role)?;
        tracing::info!(
            user = %user.username,
            from = %user.role,
            to = %role,
            changed_by = session.username(),
            "role changed"
        );
        Ok(true)
    }

    /// Delete another user after `confirm` approves it. Secrets they created
    /// are kept; their grants are removed.
    pub fn delete_user<F>(&self, session: &Session, username: &str, confirm: F) -> Result<bool>
    where
        F: FnOnce(&UserSummary) -> bool,
    {
        policy::authorize(session, Operation::ManageUsers)?;
        if username.trim() == session.username() {
            return Err(VaultError::denied("delete own account"));
        }
        let user = self.store.require_user(username.trim())?;

        if !confirm(&user.summary()) {
            tracing::debug!(user = %user.username, "user deletion cancelled");
            return Ok(false);
        }

        let deleted = self.store.delete_user(user.id)?;
        tracing::info!(user = %user.username, deleted_by = session.username(), "user deleted");
        Ok(deleted)
    }

    // -- Statistics -----------------------------------------------------------

    pub fn statistics(&self, session: &Session) -> Result<VaultStats> {
        policy::authorize(session, Operation::ViewStatistics)?;
        let since = Utc::now() - Duration::days(RECENT_ACTIVITY_DAYS);
        Ok(VaultStats {
            total_secrets: self.store.count_secrets()?,
            total_users: self.store.count_users()?,
            recent_changes: self.audit().count_since(since)?,
        })
    }

    /// The newest audit entries across every secret, including tombstones
    /// of deleted ones.
    pub fn recent_activity(&self, session: &Session, limit: usize) -> Result<Vec<AuditEntry>> {
        policy::authorize(session, Operation::ViewStatistics)?;
        self.audit().recent(limit)
    }
}

/// Trimmed text, or `None` when absent or blank.
fn normalize(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Set an optional text column from user input. Returns whether it changed.
fn apply_optional(field: &mut Option<String>, input: &str) -> bool {
    let next = normalize(Some(input));
    if field.as_deref() == next {
        return false;
    }
    *field = next.map(str::to_string);
    true
}
