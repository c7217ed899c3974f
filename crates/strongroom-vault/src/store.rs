//! SQLite persistence for users, secrets and permission grants.
//!
//! [`Store`] owns the `rusqlite::Connection` and exposes row-level CRUD with
//! no authorization logic. Secret payloads pass through it as opaque tokens;
//! encryption and the role checks live in the vault service on top.
//!
//! # Schema
//!
//! - `users`: login hash, role, key-derivation salt and iteration count.
//! - `secrets`: encrypted payload plus plaintext metadata.
//! - `access_permissions`: sharing grants, one per `(user, secret)`.
//! - `secrets_history`: audit trail, see [`crate::audit`].
//!
//! Opening a store runs pending migrations from [`crate::migration`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::migration;

/// Category given to secrets created without one.
pub const DEFAULT_CATEGORY: &str = "General";

/// Categories offered by front ends. Free text is accepted as well.
pub const SUGGESTED_CATEGORIES: &[&str] = &["General", "Email", "Social", "Work", "Banking", "Other"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Account role, least to most privileged: `User`, `Manager`, `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    User,
}

impl UserRole {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::User => "user",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| VaultError::InvalidArgument(format!("unknown role: {s}")))
    }
}

/// Secret visibility level.
///
/// `Restricted` can only be set by an admin. Reads are not gated on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Normal = 1,
    Restricted = 2,
}

impl Visibility {
    /// The integer stored in `secrets.visibility_level`.
    pub fn level(&self) -> i64 {
        *self as i64
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Self::Normal),
            2 => Some(Self::Restricted),
            _ => None,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Restricted => "restricted",
        })
    }
}

/// A full user row, including the login hash and key-derivation parameters.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role: UserRole,
    /// `None` only for rows created before per-user salts existed.
    pub kdf_salt: Option<Vec<u8>>,
    pub kdf_iterations: u32,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            role: self.role,
            must_change_password: self.must_change_password,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// User details safe to show in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// A secret row as stored, with its payload still encrypted.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub id: i64,
    pub title: String,
    pub login: Option<String>,
    /// Encrypted token produced by [`crate::crypto::encrypt`].
    pub payload: String,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub category: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub visibility: Visibility,
}

impl SecretRecord {
    pub fn summary(&self) -> SecretSummary {
        SecretSummary {
            id: self.id,
            title: self.title.clone(),
            login: self.login.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            category: self.category.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            visibility: self.visibility,
        }
    }
}

/// Secret metadata without the payload, returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSummary {
    pub id: i64,
    pub title: String,
    pub login: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub category: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub visibility: Visibility,
}

/// Listing filter. Both parts narrow the result; neither widens it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretFilter {
    /// Case-insensitive substring matched against title, login and URL.
    pub search: Option<String>,
    /// Exact category.
    pub category: Option<String>,
}

impl SecretFilter {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
            category: None,
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            search: None,
            category: Some(category.into()),
        }
    }
}

/// A sharing grant on a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub secret_id: i64,
    pub level: i64,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

/// Column values for a new secret row.
pub(crate) struct SecretDraft<'a> {
    pub title: &'a str,
    pub login: Option<&'a str>,
    pub payload: &'a str,
    pub url: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub category: &'a str,
    pub created_by: &'a str,
    pub visibility: Visibility,
}

/// Column values for a new user row.
pub(crate) struct UserDraft<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: UserRole,
    pub kdf_salt: Option<&'a [u8]>,
    pub kdf_iterations: u32,
    pub must_change_password: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = "id, username, password_hash, role, kdf_salt, kdf_iterations, \
     must_change_password, created_at, last_login";

const SECRET_COLUMNS: &str = "id, title, login, payload, url, notes, category, created_by, \
     created_at, updated_at, visibility_level";

/// SQLite-backed storage for the vault.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the file cannot be opened, or
    /// [`VaultError::MigrationFailed`] if the schema cannot be brought up to
    /// date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, true)?;
        migration::run_all(&conn)?;

        tracing::info!("vault database ready");
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, false)?;
        migration::run_all(&conn)?;
        Ok(Self { conn })
    }

    fn configure_connection(conn: &Connection, on_disk: bool) -> Result<()> {
        if on_disk {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
        }
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -8000;",
        )?;
        Ok(())
    }

    /// Access the underlying connection (used by the audit log and for
    /// transactions).
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Latest applied schema version.
    pub fn schema_version(&self) -> Result<u32> {
        migration::current_version(&self.conn)
    }

    // -- Users --------------------------------------------------------------

    pub(crate) fn insert_user(&self, draft: &UserDraft<'_>) -> Result<i64> {
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO users (username, password_hash, role, kdf_salt, kdf_iterations,
                                must_change_password, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                draft.username,
                draft.password_hash,
                draft.role.as_str(),
                draft.kdf_salt,
                draft.kdf_iterations,
                draft.must_change_password,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                map_user_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Like [`Store::find_user`] but fails with [`VaultError::UserNotFound`].
    pub fn require_user(&self, username: &str) -> Result<User> {
        self.find_user(username)?
            .ok_or_else(|| VaultError::UserNotFound {
                username: username.to_string(),
            })
    }

    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
        let users = stmt
            .query_map([], map_user_row)?
            .map(|r| r.map(|u| u.summary()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn count_admins(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin'",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn set_kdf_salt(&self, user_id: i64, salt: &[u8], iterations: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET kdf_salt = ?1, kdf_iterations = ?2 WHERE id = ?3",
            params![salt, iterations, user_id],
        )?;
        Ok(())
    }

    pub(crate) fn touch_last_login(&self, user_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![Utc::now().timestamp(), user_id],
        )?;
        Ok(())
    }

    /// Replace the login hash and key-derivation salt, clearing the
    /// forced-change flag.
    pub(crate) fn set_credentials(
        &self,
        user_id: i64,
        password_hash: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE users
             SET password_hash = ?1, kdf_salt = ?2, kdf_iterations = ?3, must_change_password = 0
             WHERE id = ?4",
            params![password_hash, salt, iterations, user_id],
        )?;
        Ok(())
    }

    pub(crate) fn set_role(&self, user_id: i64, role: UserRole) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), user_id],
        )?;
        Ok(())
    }

    /// Delete a user. Their grants go with them; secrets they created stay,
    /// and the username is retired so no later account can claim them.
    pub(crate) fn delete_user(&self, user_id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO retired_usernames (username, retired_at)
             SELECT username, ?2 FROM users WHERE id = ?1",
            params![user_id, Utc::now().timestamp()],
        )?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Whether `username` belonged to a deleted account.
    pub fn is_username_retired(&self, username: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM retired_usernames WHERE username = ?1)",
            params![username],
            |row| row.get(0),
        )?)
    }

    // -- Secrets ------------------------------------------------------------

    pub(crate) fn insert_secret(&self, draft: &SecretDraft<'_>) -> Result<i64> {
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO secrets (title, login, payload, url, notes, category, created_by,
                                  created_at, updated_at, visibility_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
            params![
                draft.title,
                draft.login,
                draft.payload,
                draft.url,
                draft.notes,
                draft.category,
                draft.created_by,
                now,
                draft.visibility.level(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_secret(&self, id: i64) -> Result<Option<SecretRecord>> {
        let secret = self
            .conn
            .query_row(
                &format!("SELECT {SECRET_COLUMNS} FROM secrets WHERE id = ?1"),
                params![id],
                map_secret_row,
            )
            .optional()?;
        Ok(secret)
    }

    /// Like [`Store::get_secret`] but fails with [`VaultError::SecretNotFound`].
    pub fn require_secret(&self, id: i64) -> Result<SecretRecord> {
        self.get_secret(id)?
            .ok_or(VaultError::SecretNotFound { id })
    }

    /// Secrets matching `filter`, most recently updated first.
    ///
    /// `owner` restricts the result to secrets created by that username.
    pub fn query_secrets(
        &self,
        owner: Option<&str>,
        filter: &SecretFilter,
    ) -> Result<Vec<SecretRecord>> {
        let pattern = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(&s.to_lowercase())));
        let category = filter
            .category
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets
             WHERE (?1 IS NULL OR created_by = ?1)
               AND (?2 IS NULL
                    OR lower(title) LIKE ?2 ESCAPE '\\'
                    OR lower(IFNULL(login, '')) LIKE ?2 ESCAPE '\\'
                    OR lower(IFNULL(url, '')) LIKE ?2 ESCAPE '\\')
               AND (?3 IS NULL OR category = ?3)
             ORDER BY updated_at DESC, id DESC"
        ))?;

        let secrets = stmt
            .query_map(params![owner, pattern, category], map_secret_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            owner = owner.unwrap_or("*"),
            count = secrets.len(),
            "queried secrets"
        );
        Ok(secrets)
    }

    /// Write every mutable column of `secret` and bump `updated_at`.
    pub(crate) fn update_secret(&self, secret: &SecretRecord) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE secrets
             SET title = ?1, login = ?2, payload = ?3, url = ?4, notes = ?5, category = ?6,
                 visibility_level = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                secret.title,
                secret.login,
                secret.payload,
                secret.url,
                secret.notes,
                secret.category,
                secret.visibility.level(),
                Utc::now().timestamp(),
                secret.id,
            ],
        )?;
        if updated == 0 {
            return Err(VaultError::SecretNotFound { id: secret.id });
        }
        Ok(())
    }

    /// Replace a payload after re-keying. Leaves `updated_at` alone since
    /// the secret itself did not change.
    pub(crate) fn rewrap_payload(&self, id: i64, payload: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE secrets SET payload = ?1 WHERE id = ?2",
            params![payload, id],
        )?;
        Ok(())
    }

    /// Delete a secret and its grants. History is handled by the audit log.
    pub(crate) fn delete_secret(&self, id: i64) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM access_permissions WHERE secret_id = ?1",
            params![id],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM secrets WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// `(id, payload)` of every secret created by `username`.
    pub(crate) fn payloads_created_by(&self, username: &str) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload FROM secrets WHERE created_by = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![username], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_secrets(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))?)
    }

    // -- Grants -------------------------------------------------------------

    /// Insert or replace the grant for `(user_id, secret_id)`.
    pub(crate) fn upsert_grant(
        &self,
        user_id: i64,
        secret_id: i64,
        level: i64,
        granted_by: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO access_permissions (user_id, secret_id, permission_level, granted_by, granted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, secret_id) DO UPDATE SET
                permission_level = excluded.permission_level,
                granted_by = excluded.granted_by,
                granted_at = excluded.granted_at",
            params![user_id, secret_id, level, granted_by, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub(crate) fn delete_grant(&self, user_id: i64, secret_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM access_permissions WHERE user_id = ?1 AND secret_id = ?2",
            params![user_id, secret_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn grants_for(&self, secret_id: i64) -> Result<Vec<PermissionGrant>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.user_id, u.username, p.secret_id, p.permission_level,
                    p.granted_by, p.granted_at
             FROM access_permissions p
             JOIN users u ON u.id = p.user_id
             WHERE p.secret_id = ?1
             ORDER BY u.username",
        )?;
        let grants = stmt
            .query_map(params![secret_id], |row| {
                let granted_at: i64 = row.get(6)?;
                Ok(PermissionGrant {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    secret_id: row.get(3)?,
                    level: row.get(4)?,
                    granted_by: row.get(5)?,
                    granted_at: DateTime::from_timestamp(granted_at, 0).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(grants)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let created_at: i64 = row.get(7)?;
    let last_login: Option<i64> = row.get(8)?;

    let role = UserRole::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown user role: {role}").into(),
        )
    })?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role,
        kdf_salt: row.get(4)?,
        kdf_iterations: row.get(5)?,
        must_change_password: row.get(6)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        last_login: last_login.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}

fn map_secret_row(row: &Row<'_>) -> rusqlite::Result<SecretRecord> {
    let created_at: i64 = row.get(8)?;
    let updated_at: i64 = row.get(9)?;
    let visibility: i64 = row.get(10)?;

    Ok(SecretRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        login: row.get(2)?,
        payload: row.get(3)?,
        url: row.get(4)?,
        notes: row.get(5)?,
        category: row.get(6)?,
        created_by: row.get(7)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
        visibility: Visibility::from_level(visibility).unwrap_or_default(),
    })
}

/// Escape `LIKE` wildcards so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn add_user(store: &Store, name: &str, role: UserRole) -> i64 {
        store
            .insert_user(&UserDraft {
                username: name,
                password_hash: "$argon2id$stub",
                role,
                kdf_salt: Some(&[7u8; 16]),
                kdf_iterations: 1_000,
                must_change_password: false,
            })
            .unwrap()
    }

    fn add_secret(store: &Store, title: &str, owner: &str, category: &str) -> i64 {
        store
            .insert_secret(&SecretDraft {
                title,
                login: Some("someone@example.com"),
                payload: "token",
                url: Some("https://example.com"),
                notes: None,
                category,
                created_by: owner,
                visibility: Visibility::Normal,
            })
            .unwrap()
    }

    #[test]
    fn role_parse_and_display() {
        for role in [UserRole::Admin, UserRole::Manager, UserRole::User] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!("Manager".parse::<UserRole>().unwrap(), UserRole::Manager);
        assert!("root".parse::<UserRole>().is_err());
        assert_eq!(UserRole::Admin.to_string(), "admin");
    }

    #[test]
    fn visibility_levels() {
        assert_eq!(Visibility::Normal.level(), 1);
        assert_eq!(Visibility::from_level(2), Some(Visibility::Restricted));
        assert_eq!(Visibility::from_level(3), None);
    }

    #[test]
    fn user_roundtrip() {
        let store = store();
        let id = add_user(&store, "alice", UserRole::Manager);

        let user = store.find_user("alice").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, UserRole::Manager);
        assert_eq!(user.kdf_salt.as_deref(), Some(&[7u8; 16][..]));
        assert_eq!(user.kdf_iterations, 1_000);
        assert!(user.last_login.is_none());

        store.touch_last_login(id).unwrap();
        assert!(store.find_user("alice").unwrap().unwrap().last_login.is_some());
    }

    #[test]
    fn duplicate_username_is_a_constraint_error() {
        let store = store();
        add_user(&store, "alice", UserRole::User);
        let err = store
            .insert_user(&UserDraft {
                username: "alice",
                password_hash: "x",
                role: UserRole::User,
                kdf_salt: None,
                kdf_iterations: 1,
                must_change_password: false,
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::Database(_)));
    }

    #[test]
    fn require_user_reports_missing() {
        let err = store().require_user("ghost").unwrap_err();
        assert!(matches!(err, VaultError::UserNotFound { .. }));
    }

    #[test]
    fn count_admins_tracks_roles() {
        let store = store();
        assert_eq!(store.count_admins().unwrap(), 0);
        let id = add_user(&store, "boss", UserRole::User);
        store.set_role(id, UserRole::Admin).unwrap();
        assert_eq!(store.count_admins().unwrap(), 1);
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn secret_roundtrip_and_defaults() {
        let store = store();
        let id = add_secret(&store, "Mail", "alice", DEFAULT_CATEGORY);

        let secret = store.require_secret(id).unwrap();
        assert_eq!(secret.title, "Mail");
        assert_eq!(secret.payload, "token");
        assert_eq!(secret.category, "General");
        assert_eq!(secret.visibility, Visibility::Normal);
        assert_eq!(secret.created_at, secret.updated_at);

        assert!(matches!(
            store.require_secret(999),
            Err(VaultError::SecretNotFound { id: 999 })
        ));
    }

    #[test]
    fn query_filters_by_owner_search_and_category() {
        let store = store();
        add_secret(&store, "GitHub", "alice", "Work");
        add_secret(&store, "Gmail", "alice", "Email");
        add_secret(&store, "Bank", "bob", "Banking");

        let all = store.query_secrets(None, &SecretFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let alice = store.query_secrets(Some("alice"), &SecretFilter::default()).unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.created_by == "alice"));

        let git = store.query_secrets(None, &SecretFilter::search("GIT")).unwrap();
        assert_eq!(git.len(), 1);
        assert_eq!(git[0].title, "GitHub");

        let by_url = store.query_secrets(None, &SecretFilter::search("example.com")).unwrap();
        assert_eq!(by_url.len(), 3);

        let email = store.query_secrets(None, &SecretFilter::category("Email")).unwrap();
        assert_eq!(email.len(), 1);

        // Filters narrow, never widen, the owner restriction.
        let bob_bank = store.query_secrets(Some("alice"), &SecretFilter::search("bank")).unwrap();
        assert!(bob_bank.is_empty());
    }

    #[test]
    fn like_wildcards_are_literal() {
        let store = store();
        add_secret(&store, "100% legit", "alice", "Other");
        add_secret(&store, "plain", "alice", "Other");

        let hits = store.query_secrets(None, &SecretFilter::search("%")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "100% legit");
    }

    #[test]
    fn update_and_delete_secret() {
        let store = store();
        let id = add_secret(&store, "Old", "alice", "General");

        let mut secret = store.require_secret(id).unwrap();
        secret.title = "New".into();
        secret.url = None;
        store.update_secret(&secret).unwrap();

        let reloaded = store.require_secret(id).unwrap();
        assert_eq!(reloaded.title, "New");
        assert!(reloaded.url.is_none());

        assert!(store.delete_secret(id).unwrap());
        assert!(!store.delete_secret(id).unwrap());
        assert!(store.get_secret(id).unwrap().is_none());
    }

    #[test]
    fn grants_upsert_and_cascade() {
        let store = store();
        let bob = add_user(&store, "bob", UserRole::User);
        let id = add_secret(&store, "Shared", "alice", "General");

        store.upsert_grant(bob, id, 1, "admin").unwrap();
        store.upsert_grant(bob, id, 2, "manager").unwrap();

        let grants = store.grants_for(id).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].username, "bob");
        assert_eq!(grants[0].level, 2);
        assert_eq!(grants[0].granted_by, "manager");

        store.delete_user(bob).unwrap();
        assert!(store.grants_for(id).unwrap().is_empty());
    }

    #[test]
    fn deleted_usernames_stay_retired() {
        let store = store();
        let bob = add_user(&store, "bob", UserRole::User);
        assert!(!store.is_username_retired("bob").unwrap());

        assert!(store.delete_user(bob).unwrap());
        assert!(store.find_user("bob").unwrap().is_none());
        assert!(store.is_username_retired("bob").unwrap());
        assert!(!store.is_username_retired("alice").unwrap());
    }

    #[test]
    fn unknown_role_in_row_is_an_error() {
        let store = store();
        store
            .connection()
            .pragma_update(None, "ignore_check_constraints", "ON")
            .unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO users (username, password_hash, role, created_at)
                 VALUES ('mallory', 'h', 'root', 0)",
                [],
            )
            .unwrap();

        let err = store.find_user("mallory").unwrap_err();
        assert!(matches!(
            err,
            VaultError::Database(rusqlite::Error::FromSqlConversionFailure(3, _, _))
        ));
    }

    #[test]
    fn payloads_created_by_owner_only() {
        let store = store();
        add_secret(&store, "a", "alice", "General");
        add_secret(&store, "b", "bob", "General");
        let rows = store.payloads_created_by("alice").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("strongroom.db");
        let store = Store::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), migration::latest_version());
        assert!(path.exists());
    }
}
