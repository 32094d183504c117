//! The vault client: one explicit object per client context.
//!
//! [`VaultClient`] owns the [`Session`] and handles to the collaborators, and
//! exposes the user-facing operations. Every operation that needs the master
//! key fails with [`VaultError::Locked`] before touching the record store when
//! the session is locked.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::backup::{self, ImportReport};
use crate::collab::{AccountId, AccountStore, RecordStore, SessionToken, TokenService};
use crate::error::{Result, VaultError};
use crate::record::{self, PlainRecord, VaultRecord};
use crate::session::Session;

/// A decrypted record together with its store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedRecord {
    pub id: String,
    pub plain: PlainRecord,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Client-side vault bound to one account.
pub struct VaultClient {
    session: Session,
    account: Option<AccountId>,
    records: Arc<dyn RecordStore>,
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn TokenService>,
}

impl VaultClient {
    /// Create a client around `session`. The client starts without an
    /// authenticated account.
    pub fn new(
        session: Session,
        records: Arc<dyn RecordStore>,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            session,
            account: None,
            records,
            accounts,
            tokens,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    /// The authenticated account, if any.
    pub fn account(&self) -> Option<&AccountId> {
        self.account.as_ref()
    }

    // -- Lock / unlock --------------------------------------------------------

    /// Verify `token`, fetch the account's salt and unlock with `password`.
    pub async fn unlock(&mut self, token: &SessionToken, password: &str) -> Result<()> {
        let account = self.tokens.verify(token).await?;
        let salt = self.accounts.salt(&account).await?;

        self.session.unlock(password, &salt)?;
        tracing::info!(%account, "client unlocked");
        self.account = Some(account);
        Ok(())
    }

    /// Verify `token` and pick up a key left in ephemeral storage.
    ///
    /// Returns whether the client is now unlocked.
    pub async fn resume(&mut self, token: &SessionToken) -> Result<bool> {
        let account = self.tokens.verify(token).await?;
        self.account = Some(account);
        self.session.resume()
    }

    /// Discard the cached key (logout).
    pub fn lock(&mut self) -> Result<()> {
        self.session.lock()
    }

    // -- Records --------------------------------------------------------------

    /// List records whose title, url or tags contain `search`, decrypted.
    pub async fn list(&self, search: &str) -> Result<Vec<DecryptedRecord>> {
        let account = self.unlocked_account()?;
        let records = self.records.list(account).await?;

        let key = self.session.key()?;
        Ok(records
            .iter()
            .filter(|r| record::matches_search(r, search))
            .map(|r| DecryptedRecord {
                id: r.id.clone(),
                plain: record::to_plain(r, key),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect())
    }

    /// Fetch and decrypt one record.
    pub async fn get(&self, id: &str) -> Result<PlainRecord> {
        let account = self.unlocked_account()?;
        let stored = self.records.get(account, id).await?;
        Ok(record::to_plain(&stored, self.session.key()?))
    }

    /// Encrypt and store a new record.
    pub async fn add(&self, plain: &PlainRecord) -> Result<VaultRecord> {
        let account = self.unlocked_account()?;
        let payload = record::to_encrypted(plain, self.session.key()?)?;

        let created = self.records.create(account, payload).await?;
        tracing::debug!(record_id = %created.id, "record added");
        Ok(created)
    }

    /// Replace every field of record `id`.
    pub async fn edit(&self, id: &str, plain: &PlainRecord) -> Result<VaultRecord> {
        let account = self.unlocked_account()?;
        let payload = record::to_encrypted(plain, self.session.key()?)?;

        let updated = self.records.update(account, id, payload).await?;
        tracing::debug!(record_id = %updated.id, "record updated");
        Ok(updated)
    }

    /// Delete record `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let account = self.unlocked_account()?;
        self.records.delete(account, id).await?;
        tracing::debug!(record_id = %id, "record deleted");
        Ok(())
    }

    // -- Backup ---------------------------------------------------------------

    /// Export every record into one encrypted blob.
    pub async fn export(&self) -> Result<String> {
        let account = self.unlocked_account()?;
        let records = self.records.list(account).await?;
        backup::export(&records, self.session.key()?)
    }

    /// Export into a dated backup file in `dir`.
    pub async fn export_to(&self, dir: &Path, date: NaiveDate) -> Result<PathBuf> {
        let blob = self.export().await?;
        backup::write_backup(dir, &blob, date)
    }

    /// Import a blob, re-encrypting every record under the current key.
    pub async fn import(&self, blob: &str) -> Result<ImportReport> {
        let account = self.unlocked_account()?;
        backup::import(blob, self.session.key()?, self.records.as_ref(), account).await
    }

    /// Import a backup file written by [`VaultClient::export_to`].
    pub async fn import_from(&self, path: &Path) -> Result<ImportReport> {
        let blob = backup::read_backup(path)?;
        self.import(&blob).await
    }

    // -- Helpers --------------------------------------------------------------

    fn unlocked_account(&self) -> Result<&AccountId> {
        self.session.key()?;
        self.account.as_ref().ok_or_else(|| VaultError::Unauthorized {
            reason: "no authenticated account".into(),
        })
    }
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("session", &self.session)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}
