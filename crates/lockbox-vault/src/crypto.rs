//! Key derivation and AES-256-GCM primitives using the `ring` crate.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256, 100,000 rounds, turning a master
//!   password and the account [`Salt`] into a 256-bit [`MasterKey`].
//! - **Sealing/opening**: AES-256-GCM with a fresh random 96-bit nonce per
//!   seal. Higher layers ([`crate::envelope`]) wrap the output into a
//!   self-contained string.
//! - **Random generation**: cryptographically secure bytes via `ring`.
//!
//! # Security Notes
//!
//! - The iteration count is fixed. Changing it changes every derived key and
//!   makes all previously encrypted records undecryptable.
//! - [`MasterKey`] zeroizes its bytes on drop and never prints them in
//!   `Debug` output.

use std::fmt;
use std::num::NonZeroU32;

use ring::aead::{
    self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of the derived master key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Minimum accepted salt length in bytes.
pub const MIN_SALT_LEN: usize = 16;

/// PBKDF2 round count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const PBKDF2_ROUNDS: NonZeroU32 = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap();

/// PBKDF2 algorithm: HMAC-SHA256.
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Salt
// ---------------------------------------------------------------------------

/// Per-account salt. Not secret; stored next to the account as hex.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Length of salts produced by [`Salt::generate`].
    pub const GENERATED_LEN: usize = 16;

    /// Wrap raw salt bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidSalt`] if fewer than [`MIN_SALT_LEN`]
    /// bytes are given.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SALT_LEN {
            return Err(VaultError::InvalidSalt {
                reason: format!(
                    "salt must be at least {MIN_SALT_LEN} bytes, got {}",
                    bytes.len()
                ),
            });
        }
        Ok(Self(bytes))
    }

    /// Parse a hex-encoded salt as stored on the account record.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| VaultError::InvalidSalt {
            reason: format!("not valid hex: {e}"),
        })?;
        Self::from_bytes(bytes)
    }

    /// Generate a fresh random salt for a new account.
    pub fn generate() -> Result<Self> {
        Self::from_bytes(random_bytes(Self::GENERATED_LEN)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Salt").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// 256-bit symmetric key derived from the master password.
///
/// Zeroized on drop. Comparison is constant-time.
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parse the 64-character hex form produced by [`MasterKey::to_hex`].
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|e| VaultError::InvalidArgument(format!("master key hex: {e}")))?,
        );
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            VaultError::InvalidArgument(format!(
                "master key must be {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Generate a random key. Used for tests and device-bound wrapping keys.
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to generate random key".into(),
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Lowercase hex of the key (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// A second owned copy, written straight into zeroizing storage.
    pub(crate) fn duplicate(&self) -> Self {
        let mut copy = Zeroizing::new([0u8; KEY_LEN]);
        copy.copy_from_slice(self.0.as_slice());
        Self(copy)
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for MasterKey {}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the master key from `password` and the account `salt`.
///
/// Deterministic: the same inputs always give the same key. There is no
/// failure mode; a wrong password simply yields a different key, which shows
/// up later as undecryptable fields.
pub fn derive(password: &str, salt: &Salt) -> MasterKey {
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        PBKDF2_ALG,
        PBKDF2_ROUNDS,
        salt.as_bytes(),
        password.as_bytes(),
        out.as_mut_slice(),
    );

    tracing::debug!(
        iterations = PBKDF2_ITERATIONS,
        "derived master key via PBKDF2"
    );

    MasterKey(out)
}

/// Hash a login password for server-side verification, with its own salt.
///
/// This is unrelated to the master key: the salt differs from the account's
/// encryption salt, so the stored hash cannot be used to decrypt anything.
pub fn hash_password(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, PBKDF2_ROUNDS, salt, password.as_bytes(), &mut out);
    out
}

/// Check a login password against a hash from [`hash_password`].
///
/// Constant-time comparison (via `ring`).
pub fn verify_password(password: &str, salt: &[u8], expected: &[u8]) -> bool {
    pbkdf2::verify(PBKDF2_ALG, PBKDF2_ROUNDS, salt, password.as_bytes(), expected).is_ok()
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so every
/// sealing key is used for a single message.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Sealing / opening
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under `key`.
///
/// Returns `(nonce, ciphertext)` where the ciphertext carries the 128-bit tag
/// appended by `ring`.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if nonce generation or sealing
/// fails.
pub fn seal(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "sealed data"
    );

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag included) sealed with `nonce` under `key`.
///
/// Returns `None` when authentication fails: wrong key, tampered data or a
/// mismatched nonce are indistinguishable.
pub fn open(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &[u8; KEY_LEN],
) -> Option<Vec<u8>> {
    let unbound_key = UnboundKey::new(AEAD_ALG, key).ok()?;
    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce::new(*nonce));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key.open_in_place(Aad::empty(), &mut in_out).ok()?;

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = plaintext.len(),
        "opened data"
    );

    Some(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random bytes".into(),
        })?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
