//! Versioned schema migrations for the vault database.
//!
//! Migrations are static SQL strings keyed by version number. Applied
//! versions are recorded in `_migrations`, so running [`run_all`] at every
//! startup is idempotent and replaces per-row "is this column there yet"
//! checks.
//!
//! Version 1 is the original schema, which had no per-user key-derivation
//! salt. Version 2 adds it. Users migrated from version 1 keep a NULL salt
//! until their next successful login, where it is generated and stored.
//! Version 3 reserves the usernames of deleted accounts.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{Result, VaultError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append new ones at the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: users, secrets, history, access permissions",
        sql: r#"
            CREATE TABLE users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role          TEXT NOT NULL DEFAULT 'user' CHECK(role IN ('admin','manager','user')),
                created_at    INTEGER NOT NULL,
                last_login    INTEGER
            );

            CREATE TABLE secrets (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                title            TEXT NOT NULL,
                login            TEXT,
                payload          TEXT NOT NULL,
                url              TEXT,
                notes            TEXT,
                category         TEXT NOT NULL DEFAULT 'General',
                created_by       TEXT NOT NULL,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL,
                visibility_level INTEGER NOT NULL DEFAULT 1 CHECK(visibility_level IN (1, 2))
            );
            CREATE INDEX idx_secrets_created_by ON secrets(created_by);
            CREATE INDEX idx_secrets_updated_at ON secrets(updated_at);

            -- No foreign key on secret_id: the DELETED entry outlives its secret.
            CREATE TABLE secrets_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                secret_id  INTEGER NOT NULL,
                action     TEXT NOT NULL CHECK(action IN ('CREATED','PASSWORD_CHANGED','DETAILS_UPDATED','DELETED')),
                old_value  TEXT,
                new_value  TEXT,
                changed_by TEXT NOT NULL,
                changed_at INTEGER NOT NULL
            );
            CREATE INDEX idx_history_secret ON secrets_history(secret_id);
            CREATE INDEX idx_history_changed_at ON secrets_history(changed_at);

            CREATE TABLE access_permissions (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id          INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                secret_id        INTEGER NOT NULL REFERENCES secrets(id) ON DELETE CASCADE,
                permission_level INTEGER NOT NULL DEFAULT 1,
                granted_by       TEXT NOT NULL,
                granted_at       INTEGER NOT NULL,
                UNIQUE(user_id, secret_id)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "per-user key derivation: salt, iteration count, forced password change",
        sql: r#"
            ALTER TABLE users ADD COLUMN kdf_salt BLOB;
            ALTER TABLE users ADD COLUMN kdf_iterations INTEGER NOT NULL DEFAULT 100000;
            ALTER TABLE users ADD COLUMN must_change_password INTEGER NOT NULL DEFAULT 0;
        "#,
    },
    Migration {
        version: 3,
        description: "retired usernames: names of deleted accounts stay reserved",
        sql: r#"
            -- Secrets record their owner by username, so a freed name must not
            -- be handed to a new account.
            CREATE TABLE retired_usernames (
                username   TEXT PRIMARY KEY,
                retired_at INTEGER NOT NULL
            );
        "#,
    },
];

/// Latest schema version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Run all pending migrations against `conn`.
pub fn run_all(conn: &Connection) -> Result<()> {
    run_up_to(conn, latest_version())
}

/// Run pending migrations up to and including `target`.
///
/// Used by tests to build a database in an older schema shape.
pub(crate) fn run_up_to(conn: &Connection, target: u32) -> Result<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
        .collect();

    if pending.is_empty() {
        debug!(current_version = current, "vault schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending vault migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| VaultError::MigrationFailed {
        version: 0,
        reason: format!("failed to read current version: {e}"),
    })
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| VaultError::MigrationFailed {
        version: 0,
        reason: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration and record it, atomically.
fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let failed = |e: rusqlite::Error| VaultError::MigrationFailed {
        version: migration.version,
        reason: e.to_string(),
    };

    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // Dropping the transaction without commit rolls it back.
    let tx = conn.unchecked_transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)?;

    info!(version = migration.version, "migration applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for expected in [
            "users",
            "secrets",
            "secrets_history",
            "access_permissions",
            "retired_usernames",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn v2_adds_salt_columns_to_legacy_users() {
        let conn = setup_conn();
        run_up_to(&conn, 1).unwrap();
        assert!(!columns(&conn, "users").contains(&"kdf_salt".to_string()));

        conn.execute(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES ('old', 'h', 'user', 0)",
            [],
        )
        .unwrap();

        run_all(&conn).unwrap();
        let cols = columns(&conn, "users");
        assert!(cols.contains(&"kdf_salt".to_string()));
        assert!(cols.contains(&"must_change_password".to_string()));

        let (salt, iterations): (Option<Vec<u8>>, u32) = conn
            .query_row(
                "SELECT kdf_salt, kdf_iterations FROM users WHERE username = 'old'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(salt.is_none());
        assert_eq!(iterations, 100_000);
    }

    #[test]
    fn role_check_constraint_rejects_unknown_roles() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES ('x', 'h', 'root', 0)",
            [],
        );
        assert!(bad.is_err());
    }
}
