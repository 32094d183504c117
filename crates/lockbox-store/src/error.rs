//! Error types for the lockbox-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`]. At the
//! collaborator trait boundary errors are mapped onto
//! [`lockbox_vault::VaultError`].

use lockbox_vault::VaultError;
use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested row was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique value is already taken.
    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    /// Credentials or a bearer token were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A vault primitive (salt, hashing, randomness) failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => VaultError::NotFound { entity, id },
            StoreError::Unauthorized(reason) => VaultError::Unauthorized { reason },
            StoreError::Vault(inner) => inner,
            other => VaultError::collaborator(other),
        }
    }
}
