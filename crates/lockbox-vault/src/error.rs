//! Vault error types.
//!
//! Every fallible public API in this crate returns [`VaultError`]. Note what
//! is *not* here: a wrong master key or a corrupted envelope never produces an
//! error. Field decryption reports that as
//! [`Decrypted::Failed`](crate::envelope::Decrypted::Failed) so a single bad
//! record cannot stop the rest of the vault from rendering.

/// Unified error type for the Lockbox client vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (in practice only when the system CSPRNG fails).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// A salt was too short or not valid hex.
    #[error("invalid salt: {reason}")]
    InvalidSalt { reason: String },

    // -- Session errors -----------------------------------------------------
    /// The session is locked; no master key is cached.
    #[error("vault is locked")]
    Locked,

    /// The ephemeral session storage could not be read or written.
    #[error("session storage failed: {reason}")]
    SessionStorage { reason: String },

    // -- Backup errors ------------------------------------------------------
    /// A backup blob did not decrypt to a sequence of records.
    #[error("backup has an invalid structure: {reason}")]
    ImportStructure { reason: String },

    /// A record submission failed part-way through an import. Records
    /// submitted before the failure are kept.
    #[error("import aborted after {submitted} record(s): {reason}")]
    ImportAborted { submitted: usize, reason: String },

    // -- Collaborator errors ------------------------------------------------
    /// The referenced record or account does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The token service rejected the session credential.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// A record store, account store or token service call failed.
    #[error("collaborator failure: {reason}")]
    Collaborator { reason: String },

    /// An argument was outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem (backup files, session key file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Shorthand for a [`VaultError::Collaborator`] built from any displayable
    /// error.
    pub fn collaborator(err: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
