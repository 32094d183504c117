//! Field-level envelopes.
//!
//! An envelope is a single string holding everything needed to decrypt one
//! secret field apart from the key:
//!
//! ```text
//! base64( [12 bytes: nonce] [ciphertext] [16 bytes: GCM tag] )
//! ```
//!
//! The empty plaintext maps to the empty envelope without touching the
//! cipher, so optional fields stay empty on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::crypto::{self, MasterKey, NONCE_LEN_BYTES, TAG_LEN};
use crate::error::Result;

/// Placeholder rendered in place of a field that could not be decrypted.
pub const DECRYPTION_FAILED: &str = "DECRYPTION_FAILED";

/// Outcome of decrypting one envelope.
///
/// Wrong keys and malformed envelopes are deliberately folded into the same
/// [`Decrypted::Failed`] value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    Plaintext(String),
    Failed,
}

impl Decrypted {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// The plaintext, if decryption succeeded.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Plaintext(text) => Some(text),
            Self::Failed => None,
        }
    }

    /// The plaintext, or [`DECRYPTION_FAILED`] for display.
    pub fn into_display(self) -> String {
        self.ok().unwrap_or_else(|| DECRYPTION_FAILED.to_string())
    }
}

/// Encrypt one field under `key`.
///
/// Every call uses a fresh nonce, so encrypting the same text twice yields
/// two different envelopes.
pub fn encrypt(plaintext: &str, key: &MasterKey) -> Result<String> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }

    let (nonce, ciphertext) = crypto::seal(plaintext.as_bytes(), key.as_bytes())?;

    let mut packed = Vec::with_capacity(NONCE_LEN_BYTES + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(packed))
}

/// Decrypt one envelope under `key`. Never fails loudly.
pub fn decrypt(envelope: &str, key: &MasterKey) -> Decrypted {
    if envelope.is_empty() {
        return Decrypted::Plaintext(String::new());
    }

    let Ok(packed) = STANDARD.decode(envelope.trim()) else {
        tracing::debug!("envelope is not valid base64");
        return Decrypted::Failed;
    };

    if packed.len() < NONCE_LEN_BYTES + TAG_LEN {
        tracing::debug!(len = packed.len(), "envelope too short");
        return Decrypted::Failed;
    }

    let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_bytes);

    match crypto::open(&nonce, ciphertext, key.as_bytes()).map(String::from_utf8) {
        Some(Ok(text)) => Decrypted::Plaintext(text),
        _ => Decrypted::Failed,
    }
}
