//! SQLite-backed record store.
//!
//! Records are held in wire form exactly as the vault core produced them.
//! Tags are a JSON array column; timestamps are Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockbox_vault::collab::{AccountId, RecordStore};
use lockbox_vault::{NewVaultRecord, VaultRecord};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

const SELECT_COLUMNS: &str = "id, title, url, tags, encrypted_username, encrypted_password, \
                              encrypted_notes, created_at, updated_at";

/// Vault items of every account, in one SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All records of `account`, newest first.
    #[instrument(skip(self))]
    pub async fn list_records(&self, account: &AccountId) -> StoreResult<Vec<VaultRecord>> {
        let account_id = account.as_str().to_string();
        let records: Vec<VaultRecord> = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM vault_items WHERE account_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC"
                ))?;
                let rows = stmt
                    .query_map([&account_id], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RawRecord::into_record).collect()
            })
            .await?;

        debug!(count = records.len(), "listed records");
        Ok(records)
    }

    /// One record of `account`.
    #[instrument(skip(self))]
    pub async fn get_record(&self, account: &AccountId, id: &str) -> StoreResult<VaultRecord> {
        let account_id = account.as_str().to_string();
        let id = id.to_string();
        self.db
            .execute(move |conn| fetch(conn, &account_id, &id))
            .await
    }

    /// Insert a new record with a fresh UUID v7 id.
    #[instrument(skip(self, record))]
    pub async fn create_record(
        &self,
        account: &AccountId,
        record: NewVaultRecord,
    ) -> StoreResult<VaultRecord> {
        validate(&record)?;

        let account_id = account.as_str().to_string();
        let id = Uuid::now_v7().to_string();
        let tags = serde_json::to_string(&record.tags)?;
        let now = Utc::now();
        let millis = now.timestamp_millis();

        let stored = VaultRecord {
            id: id.clone(),
            title: record.title,
            url: record.url,
            tags: record.tags,
            encrypted_username: record.encrypted_username,
            encrypted_password: record.encrypted_password,
            encrypted_notes: record.encrypted_notes,
            created_at: from_millis(millis),
            updated_at: from_millis(millis),
        };

        let row = stored.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO vault_items (id, account_id, title, url, tags, encrypted_username, \
                     encrypted_password, encrypted_notes, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    rusqlite::params![
                        row.id,
                        account_id,
                        row.title,
                        row.url,
                        tags,
                        row.encrypted_username,
                        row.encrypted_password,
                        row.encrypted_notes,
                        millis,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(record_id = %stored.id, "record created");
        Ok(stored)
    }

    /// Replace every field of an existing record.
    #[instrument(skip(self, record))]
    pub async fn update_record(
        &self,
        account: &AccountId,
        id: &str,
        record: NewVaultRecord,
    ) -> StoreResult<VaultRecord> {
        validate(&record)?;

        let account_id = account.as_str().to_string();
        let id = id.to_string();
        let tags = serde_json::to_string(&record.tags)?;
        let now = Utc::now().timestamp_millis();

        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE vault_items SET title = ?1, url = ?2, tags = ?3, \
                     encrypted_username = ?4, encrypted_password = ?5, encrypted_notes = ?6, \
                     updated_at = ?7 WHERE id = ?8 AND account_id = ?9",
                    rusqlite::params![
                        record.title,
                        record.url,
                        tags,
                        record.encrypted_username,
                        record.encrypted_password,
                        record.encrypted_notes,
                        now,
                        id,
                        account_id,
                    ],
                )?;
                if changed == 0 {
                    return Err(not_found(&id));
                }
                fetch(conn, &account_id, &id)
            })
            .await
    }

    /// Delete a record of `account`.
    #[instrument(skip(self))]
    pub async fn delete_record(&self, account: &AccountId, id: &str) -> StoreResult<()> {
        let account_id = account.as_str().to_string();
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM vault_items WHERE id = ?1 AND account_id = ?2",
                    rusqlite::params![id, account_id],
                )?;
                if changed == 0 {
                    return Err(not_found(&id));
                }
                debug!(record_id = %id, "record deleted");
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list(&self, account: &AccountId) -> lockbox_vault::Result<Vec<VaultRecord>> {
        Ok(self.list_records(account).await?)
    }

    async fn get(&self, account: &AccountId, id: &str) -> lockbox_vault::Result<VaultRecord> {
        Ok(self.get_record(account, id).await?)
    }

    async fn create(
        &self,
        account: &AccountId,
        record: NewVaultRecord,
    ) -> lockbox_vault::Result<VaultRecord> {
        Ok(self.create_record(account, record).await?)
    }

    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        record: NewVaultRecord,
    ) -> lockbox_vault::Result<VaultRecord> {
        Ok(self.update_record(account, id, record).await?)
    }

    async fn delete(&self, account: &AccountId, id: &str) -> lockbox_vault::Result<()> {
        Ok(self.delete_record(account, id).await?)
    }
}

// ── row mapping ──────────────────────────────────────────────────────

/// A row before its tags column is parsed.
struct RawRecord {
    id: String,
    title: String,
    url: String,
    tags: String,
    encrypted_username: String,
    encrypted_password: String,
    encrypted_notes: String,
    created_at: i64,
    updated_at: i64,
}

impl RawRecord {
    fn into_record(self) -> StoreResult<VaultRecord> {
        Ok(VaultRecord {
            id: self.id,
            title: self.title,
            url: self.url,
            tags: serde_json::from_str(&self.tags)?,
            encrypted_username: self.encrypted_username,
            encrypted_password: self.encrypted_password,
            encrypted_notes: self.encrypted_notes,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        tags: row.get(3)?,
        encrypted_username: row.get(4)?,
        encrypted_password: row.get(5)?,
        encrypted_notes: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn fetch(conn: &Connection, account_id: &str, id: &str) -> StoreResult<VaultRecord> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM vault_items WHERE id = ?1 AND account_id = ?2"),
        rusqlite::params![id, account_id],
        read_row,
    )
    .optional()?
    .ok_or_else(|| not_found(id))?
    .into_record()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "record",
        id: id.to_string(),
    }
}

fn validate(record: &NewVaultRecord) -> StoreResult<()> {
    if record.title.trim().is_empty() {
        return Err(StoreError::InvalidArgument("title must not be empty".into()));
    }
    Ok(())
}
