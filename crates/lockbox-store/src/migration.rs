//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch keyed by version. Applied versions
//! are recorded in `_migrations`, so running twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append new migrations at the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "accounts and vault items",
        sql: r#"
            CREATE TABLE accounts (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                encryption_salt TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE vault_items (
                id                 TEXT PRIMARY KEY,
                account_id         TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                title              TEXT NOT NULL,
                url                TEXT NOT NULL DEFAULT '',
                tags               TEXT NOT NULL DEFAULT '[]',
                encrypted_username TEXT NOT NULL,
                encrypted_password TEXT NOT NULL,
                encrypted_notes    TEXT NOT NULL DEFAULT '',
                created_at         INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL
            );
            CREATE INDEX idx_vault_items_account ON vault_items(account_id, created_at);
        "#,
    },
    Migration {
        version: 2,
        description: "bearer tokens",
        sql: r#"
            CREATE TABLE tokens (
                token      TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_tokens_account ON tokens(account_id);
        "#,
    },
];

/// Run all pending migrations against `conn`. Synchronous.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    // `conn.transaction()` needs `&mut Connection`.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| fail(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().timestamp()
                ],
            )
            .map(|_| ())
            .map_err(|e| fail(format!("failed to record migration: {e}")))
        });

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATEST_VERSION: u32 = 2;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(LATEST_VERSION));
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn vault_items_require_an_account() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let orphan = conn.execute(
            "INSERT INTO vault_items (id, account_id, title, encrypted_username, encrypted_password, created_at, updated_at) \
             VALUES ('i', 'missing', 't', 'u', 'p', 0, 0)",
            [],
        );
        assert!(orphan.is_err());
    }

    #[test]
    fn email_is_unique() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let insert = |id: &str| {
            conn.execute(
                "INSERT INTO accounts (id, email, password_hash, encryption_salt, created_at, updated_at) \
                 VALUES (?1, 'a@example.com', 'h', 's', 0, 0)",
                [id],
            )
        };
        insert("one").unwrap();
        assert!(insert("two").is_err());
    }
}
