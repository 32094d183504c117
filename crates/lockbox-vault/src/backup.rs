//! Encrypted backups of a whole vault.
//!
//! A backup blob is one field envelope (see [`crate::envelope`]) wrapping the
//! pretty-printed JSON array of [`PlainRecord`]s. The file holding it has no
//! header, version or magic number: its entire content is the envelope.
//!
//! Import always re-encrypts under the *current* key, which need not be the
//! key the backup was exported with. Records are submitted one at a time;
//! a failed submission stops the import and earlier submissions stay.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;

use crate::collab::{AccountId, RecordStore};
use crate::crypto::MasterKey;
use crate::envelope::{self, Decrypted};
use crate::error::{Result, VaultError};
use crate::record::{self, PlainRecord, VaultRecord};

/// Prefix of backup file names.
pub const BACKUP_FILE_PREFIX: &str = "secure-vault-backup-";

/// Outcome of a completed import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of records created in the record store.
    pub created: usize,
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Decrypt `records`, serialize them in order, and encrypt the result into a
/// single blob.
pub fn export(records: &[VaultRecord], key: &MasterKey) -> Result<String> {
    let plain: Vec<PlainRecord> = records.iter().map(|r| record::to_plain(r, key)).collect();
    let json = zeroize::Zeroizing::new(serde_json::to_string_pretty(&plain)?);

    let blob = envelope::encrypt(&json, key)?;
    tracing::info!(records = plain.len(), "exported vault backup");
    Ok(blob)
}

/// File name for a backup taken on `date`.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("{BACKUP_FILE_PREFIX}{}.txt", date.format("%Y-%m-%d"))
}

/// Write `blob` as the whole content of a dated backup file in `dir`.
pub fn write_backup(dir: &Path, blob: &str, date: NaiveDate) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(backup_file_name(date));
    std::fs::write(&path, blob)?;

    tracing::info!(path = %path.display(), "wrote backup file");
    Ok(path)
}

/// Read a backup file back into a blob.
pub fn read_backup(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Decrypt `blob` and parse it into plain records.
///
/// # Errors
///
/// Returns [`VaultError::ImportStructure`] if the blob does not decrypt
/// under `key`, is not JSON, is not an array, or holds an element that is not
/// a record object.
pub fn parse(blob: &str, key: &MasterKey) -> Result<Vec<PlainRecord>> {
    let json = match envelope::decrypt(blob.trim(), key) {
        Decrypted::Plaintext(json) => zeroize::Zeroizing::new(json),
        Decrypted::Failed => {
            return Err(VaultError::ImportStructure {
                reason: "backup could not be decrypted with the current key".into(),
            });
        }
    };

    let value: Value = serde_json::from_str(&json).map_err(|e| VaultError::ImportStructure {
        reason: format!("backup is not valid JSON: {e}"),
    })?;

    let Value::Array(items) = value else {
        return Err(VaultError::ImportStructure {
            reason: "backup does not contain a list of records".into(),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(VaultError::ImportStructure {
                    reason: format!("entry {index} is not a record"),
                });
            }
            serde_json::from_value(item).map_err(|e| VaultError::ImportStructure {
                reason: format!("entry {index} is malformed: {e}"),
            })
        })
        .collect()
}

/// Import `blob` into `account`, re-encrypting under `key`.
///
/// Structure errors abort before anything is submitted. A failed submission
/// aborts the rest with [`VaultError::ImportAborted`]; nothing is rolled back.
pub async fn import(
    blob: &str,
    key: &MasterKey,
    store: &dyn RecordStore,
    account: &AccountId,
) -> Result<ImportReport> {
    let records = parse(blob, key)?;
    let total = records.len();

    let mut created = 0;
    for plain in &records {
        let payload = record::to_encrypted(plain, key)?;
        if let Err(e) = store.create(account, payload).await {
            tracing::warn!(created, total, error = %e, "import aborted");
            return Err(VaultError::ImportAborted {
                submitted: created,
                reason: e.to_string(),
            });
        }
        created += 1;
    }

    tracing::info!(created, %account, "imported vault backup");
    Ok(ImportReport { created })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MemoryRecordStore;

    fn plain(title: &str, password: &str) -> PlainRecord {
        PlainRecord {
            title: title.into(),
            url: format!("https://{title}.example"),
            username: "me".into(),
            password: password.into(),
            notes: String::new(),
            tags: vec!["t".into()],
        }
    }

    async fn seeded(key: &MasterKey, store: &MemoryRecordStore, account: &AccountId) {
        for (title, pw) in [("a", "1"), ("b", "2")] {
            let payload = record::to_encrypted(&plain(title, pw), key).unwrap();
            store.create(account, payload).await.unwrap();
        }
    }

    #[test]
    fn file_name_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(backup_file_name(date), "secure-vault-backup-2024-03-09.txt");
    }

    #[tokio::test]
    async fn export_parse_preserves_order_and_content() {
        let key = MasterKey::random().unwrap();
        let store = MemoryRecordStore::new();
        let account = AccountId::new("acct");
        seeded(&key, &store, &account).await;

        let records = store.list(&account).await.unwrap();
        let blob = export(&records, &key).unwrap();

        assert!(!blob.contains("https://"));
        let parsed = parse(&blob, &key).unwrap();
        assert_eq!(parsed, vec![plain("b", "2"), plain("a", "1")]);
    }

    #[test]
    fn parse_with_wrong_key_is_structure_error() {
        let key = MasterKey::random().unwrap();
        let other = MasterKey::random().unwrap();
        let blob = export(&[], &key).unwrap();

        assert!(parse(&blob, &key).unwrap().is_empty());
        assert!(matches!(
            parse(&blob, &other),
            Err(VaultError::ImportStructure { .. })
        ));
    }

    #[test]
    fn parse_rejects_non_record_elements() {
        let key = MasterKey::random().unwrap();
        let blob = envelope::encrypt(r#"[{"title":"ok"}, 42]"#, &key).unwrap();

        assert!(matches!(
            parse(&blob, &key),
            Err(VaultError::ImportStructure { .. })
        ));
    }

    #[test]
    fn parse_fills_missing_fields() {
        let key = MasterKey::random().unwrap();
        let blob = envelope::encrypt(r#"[{"title":"legacy","password":"pw"}]"#, &key).unwrap();

        let parsed = parse(&blob, &key).unwrap();
        assert_eq!(parsed[0].title, "legacy");
        assert_eq!(parsed[0].password, "pw");
        assert!(parsed[0].tags.is_empty());
        assert_eq!(parsed[0].notes, "");
    }

    #[tokio::test]
    async fn import_reencrypts_under_current_key() {
        let old_key = MasterKey::random().unwrap();
        let new_key = MasterKey::random().unwrap();

        let source = MemoryRecordStore::new();
        let account = AccountId::new("acct");
        seeded(&old_key, &source, &account).await;
        let records = source.list(&account).await.unwrap();

        // Re-wrap the old backup's JSON under the new key, as if the user had
        // carried the plaintext across.
        let json = serde_json::to_string(&parse(&export(&records, &old_key).unwrap(), &old_key).unwrap())
            .unwrap();
        let blob = envelope::encrypt(&json, &new_key).unwrap();

        let target = MemoryRecordStore::new();
        let report = import(&blob, &new_key, &target, &account).await.unwrap();
        assert_eq!(report.created, 2);

        for stored in target.list(&account).await.unwrap() {
            let plain = record::to_plain(&stored, &new_key);
            assert_ne!(plain.password, envelope::DECRYPTION_FAILED);
        }
    }

    #[tokio::test]
    async fn backup_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::random().unwrap();
        let blob = export(&[], &key).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();

        let path = write_backup(dir.path(), &blob, date).unwrap();
        assert!(path.ends_with("secure-vault-backup-2025-01-31.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), blob);
        assert_eq!(read_backup(&path).unwrap(), blob);
    }
}
