//! Contracts for the external collaborators the vault core talks to.
//!
//! The core never stores records or verifies credentials itself. It consumes:
//!
//! - an [`AccountStore`] that hands out the per-account [`Salt`],
//! - a [`RecordStore`] holding records in wire form,
//! - a [`TokenService`] that turns an opaque session credential into an
//!   account identity.
//!
//! Collaborator calls are the only suspension points of the core. Failures
//! surface as [`VaultError::Collaborator`], [`VaultError::NotFound`] or
//! [`VaultError::Unauthorized`].
//!
//! [`MemoryRecordStore`] is a complete in-process record store, useful for
//! tests and for embedding the vault without a server.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::crypto::Salt;
use crate::error::{Result, VaultError};
use crate::record::{NewVaultRecord, VaultRecord};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of an account in the account store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque session credential issued by the token service. Its contents are
/// never inspected by the core.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read access to account records. The password hash is never requested.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The encryption salt of `account`.
    async fn salt(&self, account: &AccountId) -> Result<Salt>;
}

/// CRUD over vault records keyed by (account, record id). Records cross this
/// boundary in wire form, verbatim.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of `account`, newest first.
    async fn list(&self, account: &AccountId) -> Result<Vec<VaultRecord>>;

    /// One record, or [`VaultError::NotFound`].
    async fn get(&self, account: &AccountId, id: &str) -> Result<VaultRecord>;

    /// Create a record and return it with its assigned id.
    async fn create(&self, account: &AccountId, record: NewVaultRecord) -> Result<VaultRecord>;

    /// Replace every field of an existing record.
    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        record: NewVaultRecord,
    ) -> Result<VaultRecord>;

    /// Delete a record, or [`VaultError::NotFound`].
    async fn delete(&self, account: &AccountId, id: &str) -> Result<()>;
}

/// Verifies session credentials.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// The account `token` proves, or [`VaultError::Unauthorized`].
    async fn verify(&self, token: &SessionToken) -> Result<AccountId>;
}

// ---------------------------------------------------------------------------
// In-memory record store
// ---------------------------------------------------------------------------

/// Record store kept in process memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<AccountId, Vec<VaultRecord>>>,
    next_id: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for `account`.
    pub async fn count(&self, account: &AccountId) -> usize {
        self.records
            .lock()
            .await
            .get(account)
            .map_or(0, Vec::len)
    }

    fn not_found(id: &str) -> VaultError {
        VaultError::NotFound {
            entity: "record",
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(&self, account: &AccountId) -> Result<Vec<VaultRecord>> {
        let records = self.records.lock().await;
        let mut list = records.get(account).cloned().unwrap_or_default();
        list.reverse();
        Ok(list)
    }

    async fn get(&self, account: &AccountId, id: &str) -> Result<VaultRecord> {
        self.records
            .lock()
            .await
            .get(account)
            .and_then(|list| list.iter().find(|r| r.id == id))
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create(&self, account: &AccountId, record: NewVaultRecord) -> Result<VaultRecord> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Utc::now();
        let stored = VaultRecord {
            id: format!("mem-{id}"),
            title: record.title,
            url: record.url,
            tags: record.tags,
            encrypted_username: record.encrypted_username,
            encrypted_password: record.encrypted_password,
            encrypted_notes: record.encrypted_notes,
            created_at: now,
            updated_at: now,
        };

        self.records
            .lock()
            .await
            .entry(account.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        record: NewVaultRecord,
    ) -> Result<VaultRecord> {
        let mut records = self.records.lock().await;
        let existing = records
            .get_mut(account)
            .and_then(|list| list.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| Self::not_found(id))?;

        existing.title = record.title;
        existing.url = record.url;
        existing.tags = record.tags;
        existing.encrypted_username = record.encrypted_username;
        existing.encrypted_password = record.encrypted_password;
        existing.encrypted_notes = record.encrypted_notes;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete(&self, account: &AccountId, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let list = records
            .get_mut(account)
            .ok_or_else(|| Self::not_found(id))?;
        let before = list.len();
        list.retain(|r| r.id != id);
        if list.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}
