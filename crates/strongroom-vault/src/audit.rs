//! Append-only audit trail of secret mutations.
//!
//! Every successful create, update and delete appends one row to
//! `secrets_history`. Summaries never carry plaintext secret material: value
//! changes are recorded as [`MASKED`], creation and deletion as the title,
//! metadata edits as the list of changed field names.
//!
//! Deleting a secret records `DELETED` first and then purges the secret's
//! earlier entries, so the `DELETED` row survives as a tombstone.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Summary stored in place of any secret value.
pub const MASKED: &str = "***";

/// The kind of change an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    PasswordChanged,
    DetailsUpdated,
    Deleted,
}

impl AuditAction {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PasswordChanged => "PASSWORD_CHANGED",
            Self::DetailsUpdated => "DETAILS_UPDATED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "PASSWORD_CHANGED" => Some(Self::PasswordChanged),
            "DETAILS_UPDATED" => Some(Self::DetailsUpdated),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub secret_id: i64,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

/// Summary used for creation and deletion entries.
pub fn title_summary(title: &str) -> String {
    format!("Title: {title}")
}

/// Summary used for metadata edits, e.g. `"title, url"`.
pub fn fields_summary(fields: &[&str]) -> String {
    fields.join(", ")
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Reads and appends `secrets_history` rows on a borrowed connection.
pub struct AuditLog<'a> {
    conn: &'a Connection,
}

impl<'a> AuditLog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append an entry and return its id.
    pub fn append(
        &self,
        secret_id: i64,
        action: AuditAction,
        actor: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO secrets_history (secret_id, action, old_value, new_value, changed_by, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                secret_id,
                action.as_str(),
                old_value,
                new_value,
                actor,
                Utc::now().timestamp(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        tracing::debug!(
            secret_id = secret_id,
            action = %action,
            actor = actor,
            "audit entry recorded"
        );
        Ok(id)
    }

    /// Entries for one secret, most recent first.
    pub fn history(&self, secret_id: i64) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, secret_id, action, old_value, new_value, changed_by, changed_at
             FROM secrets_history
             WHERE secret_id = ?1
             ORDER BY changed_at DESC, id DESC",
        )?;
        let entries = stmt
            .query_map(params![secret_id], map_entry_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// The most recent `limit` entries across all secrets.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, secret_id, action, old_value, new_value, changed_by, changed_at
             FROM secrets_history
             ORDER BY changed_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = stmt
            .query_map(params![limit], map_entry_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Number of entries recorded at or after `since`.
    pub fn count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM secrets_history WHERE changed_at >= ?1",
            params![since.timestamp()],
            |row| row.get(0),
        )?)
    }

    /// Remove every entry of `secret_id` except `keep_id`. Returns the number
    /// of purged rows.
    pub(crate) fn purge_except(&self, secret_id: i64, keep_id: i64) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM secrets_history WHERE secret_id = ?1 AND id != ?2",
            params![secret_id, keep_id],
        )?;
        Ok(purged)
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(2)?;
    let changed_at: i64 = row.get(6)?;

    let action = AuditAction::parse(&action).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown audit action: {action}").into(),
        )
    })?;

    Ok(AuditEntry {
        id: row.get(0)?,
        secret_id: row.get(1)?,
        action,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        changed_by: row.get(5)?,
        changed_at: DateTime::from_timestamp(changed_at, 0).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migration::run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn action_parse_roundtrip() {
        for action in [
            AuditAction::Created,
            AuditAction::PasswordChanged,
            AuditAction::DetailsUpdated,
            AuditAction::Deleted,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("VIEWED"), None);
    }

    #[test]
    fn summaries() {
        assert_eq!(title_summary("Mail"), "Title: Mail");
        assert_eq!(fields_summary(&["title", "url"]), "title, url");
        assert_eq!(MASKED, "***");
    }

    #[test]
    fn history_is_newest_first() {
        let conn = conn();
        let log = AuditLog::new(&conn);

        log.append(1, AuditAction::Created, "alice", None, Some("Title: A"))
            .unwrap();
        log.append(1, AuditAction::PasswordChanged, "alice", Some(MASKED), Some(MASKED))
            .unwrap();
        log.append(2, AuditAction::Created, "bob", None, Some("Title: B"))
            .unwrap();

        let history = log.history(1).unwrap();
        assert_eq!(history.len(), 2);
        // Same second: ties are broken by id.
        assert_eq!(history[0].action, AuditAction::PasswordChanged);
        assert_eq!(history[1].action, AuditAction::Created);
        assert_eq!(history[1].new_value.as_deref(), Some("Title: A"));
    }

    #[test]
    fn recent_and_count_since() {
        let conn = conn();
        let log = AuditLog::new(&conn);
        for id in 1..=5 {
            log.append(id, AuditAction::Created, "alice", None, None).unwrap();
        }

        let recent = log.recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].secret_id, 5);

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(log.count_since(hour_ago).unwrap(), 5);
        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(log.count_since(later).unwrap(), 0);
    }

    #[test]
    fn purge_keeps_tombstone() {
        let conn = conn();
        let log = AuditLog::new(&conn);
        log.append(7, AuditAction::Created, "alice", None, None).unwrap();
        log.append(7, AuditAction::DetailsUpdated, "alice", None, None).unwrap();
        let tombstone = log
            .append(7, AuditAction::Deleted, "alice", Some("Title: X"), None)
            .unwrap();

        assert_eq!(log.purge_except(7, tombstone).unwrap(), 2);
        let history = log.history(7).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::Deleted);
    }
}
