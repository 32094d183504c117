//! Vault records in wire form and working form, and the mapping between them.
//!
//! A [`VaultRecord`] is what the record store holds: title, url and tags in
//! the clear (they drive search and sorting) and three envelopes for the
//! username, password and notes. A [`PlainRecord`] is the same entry with all
//! fields decrypted, and is also the projection written into backups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::MasterKey;
use crate::envelope;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A stored record as returned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    /// Store-assigned identifier.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Records created before tags existed have none.
    #[serde(default)]
    pub tags: Vec<String>,
    pub encrypted_username: String,
    pub encrypted_password: String,
    #[serde(default)]
    pub encrypted_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a record or fully replacing an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVaultRecord {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub encrypted_username: String,
    pub encrypted_password: String,
    #[serde(default)]
    pub encrypted_notes: String,
}

/// A record with every field in plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlainRecord {
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub notes: String,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Decrypt the secret fields of `record`.
///
/// Fields that fail to decrypt come back as
/// [`DECRYPTION_FAILED`](envelope::DECRYPTION_FAILED); the rest of the record
/// is still usable.
pub fn to_plain(record: &VaultRecord, key: &MasterKey) -> PlainRecord {
    let username = envelope::decrypt(&record.encrypted_username, key);
    let password = envelope::decrypt(&record.encrypted_password, key);
    let notes = envelope::decrypt(&record.encrypted_notes, key);

    let failed = [&username, &password, &notes]
        .iter()
        .filter(|d| d.is_failed())
        .count();
    if failed > 0 {
        tracing::warn!(record_id = %record.id, failed, "record has undecryptable fields");
    }

    PlainRecord {
        title: record.title.clone(),
        url: record.url.clone(),
        username: username.into_display(),
        password: password.into_display(),
        notes: notes.into_display(),
        tags: record.tags.clone(),
    }
}

/// Encrypt the secret fields of `plain`. Title, url and tags stay in the
/// clear; tags are normalized.
pub fn to_encrypted(plain: &PlainRecord, key: &MasterKey) -> Result<NewVaultRecord> {
    Ok(NewVaultRecord {
        title: plain.title.clone(),
        url: plain.url.clone(),
        tags: normalize_tags(&plain.tags),
        encrypted_username: envelope::encrypt(&plain.username, key)?,
        encrypted_password: envelope::encrypt(&plain.password, key)?,
        encrypted_notes: envelope::encrypt(&plain.notes, key)?,
    })
}

// ---------------------------------------------------------------------------
// Tags and search
// ---------------------------------------------------------------------------

/// Trim every tag and drop the ones left empty.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.as_ref().trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated tag string as typed in a form field.
pub fn parse_tags(input: &str) -> Vec<String> {
    normalize_tags(&input.split(',').collect::<Vec<_>>())
}

/// Render tags back into the comma-separated form.
pub fn format_tags(tags: &[String]) -> String {
    tags.join(", ")
}

/// Case-insensitive substring match over the plaintext metadata (title, url,
/// tags). An empty term matches everything.
pub fn matches_search(record: &VaultRecord, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    record.title.to_lowercase().contains(&needle)
        || record.url.to_lowercase().contains(&needle)
        || record
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DECRYPTION_FAILED;

    fn sample() -> PlainRecord {
        PlainRecord {
            title: "GitHub".into(),
            url: "https://github.com".into(),
            username: "octocat".into(),
            password: "hunter2".into(),
            notes: String::new(),
            tags: vec!["work".into(), "code".into()],
        }
    }

    fn stored(new: NewVaultRecord) -> VaultRecord {
        let now = Utc::now();
        VaultRecord {
            id: "rec-1".into(),
            title: new.title,
            url: new.url,
            tags: new.tags,
            encrypted_username: new.encrypted_username,
            encrypted_password: new.encrypted_password,
            encrypted_notes: new.encrypted_notes,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn codec_roundtrip() {
        let key = MasterKey::random().unwrap();
        let plain = sample();

        let encrypted = to_encrypted(&plain, &key).unwrap();
        assert_eq!(encrypted.title, "GitHub");
        assert_ne!(encrypted.encrypted_password, "hunter2");
        assert_eq!(encrypted.encrypted_notes, "");

        assert_eq!(to_plain(&stored(encrypted), &key), plain);
    }

    #[test]
    fn wrong_key_renders_sentinel_but_keeps_metadata() {
        let key = MasterKey::random().unwrap();
        let other = MasterKey::random().unwrap();

        let record = stored(to_encrypted(&sample(), &key).unwrap());
        let plain = to_plain(&record, &other);

        assert_eq!(plain.title, "GitHub");
        assert_eq!(plain.username, DECRYPTION_FAILED);
        assert_eq!(plain.password, DECRYPTION_FAILED);
        // Empty notes carry no ciphertext and decrypt to empty under any key.
        assert_eq!(plain.notes, "");
    }

    #[test]
    fn tags_are_normalized_on_encrypt() {
        let key = MasterKey::random().unwrap();
        let mut plain = sample();
        plain.tags = vec!["  work ".into(), "".into(), "   ".into(), "personal".into()];

        let encrypted = to_encrypted(&plain, &key).unwrap();
        assert_eq!(encrypted.tags, vec!["work", "personal"]);
    }

    #[test]
    fn parse_and_format_tags() {
        assert_eq!(parse_tags(" a, b ,, c ,"), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
        assert_eq!(format_tags(&["a".into(), "b".into()]), "a, b");
    }

    #[test]
    fn search_matches_title_url_and_tags() {
        let key = MasterKey::random().unwrap();
        let record = stored(to_encrypted(&sample(), &key).unwrap());

        assert!(matches_search(&record, ""));
        assert!(matches_search(&record, "git"));
        assert!(matches_search(&record, "GITHUB.COM"));
        assert!(matches_search(&record, "Cod"));
        assert!(!matches_search(&record, "octocat"));
        assert!(!matches_search(&record, "bank"));
    }

    #[test]
    fn wire_form_uses_camel_case() {
        let key = MasterKey::random().unwrap();
        let record = stored(to_encrypted(&sample(), &key).unwrap());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("encryptedUsername").is_some());
        assert!(json.get("createdAt").is_some());

        let back: VaultRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
