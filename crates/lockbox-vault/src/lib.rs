//! Client-side encryption core for the Lockbox password vault.
//!
//! Secrets are encrypted before they leave the client. The record store only
//! ever sees ciphertext envelopes; the master password and the key derived
//! from it never leave the process.
//!
//! # Modules
//!
//! - [`crypto`]: PBKDF2 key derivation, AES-256-GCM sealing, salts and keys.
//! - [`envelope`]: self-contained per-field ciphertext strings.
//! - [`record`]: wire and plaintext record forms and the codec between them.
//! - [`session`]: the locked/unlocked session key store.
//! - [`backup`]: encrypted export/import of a whole vault.
//! - [`collab`]: record store, account store and token service contracts.
//! - [`client`]: [`VaultClient`], the per-context entry point.
//! - [`generator`]: random password generation.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lockbox_vault::collab::{AccountStore, MemoryRecordStore, SessionToken, TokenService};
//! use lockbox_vault::record::PlainRecord;
//! use lockbox_vault::{Session, VaultClient};
//!
//! # async fn example(
//! #     accounts: Arc<dyn AccountStore>,
//! #     tokens: Arc<dyn TokenService>,
//! #     token: SessionToken,
//! # ) -> lockbox_vault::Result<()> {
//! let mut client = VaultClient::new(
//!     Session::new(),
//!     Arc::new(MemoryRecordStore::new()),
//!     accounts,
//!     tokens,
//! );
//!
//! client.unlock(&token, "correct horse battery staple").await?;
//!
//! client
//!     .add(&PlainRecord {
//!         title: "GitHub".into(),
//!         username: "octocat".into(),
//!         password: "hunter2".into(),
//!         ..PlainRecord::default()
//!     })
//!     .await?;
//!
//! for entry in client.list("git").await? {
//!     println!("{} / {}", entry.plain.title, entry.plain.username);
//! }
//!
//! client.lock()?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod client;
pub mod collab;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod generator;
pub mod record;
pub mod session;

// Re-export the most commonly used types at the crate root for convenience.
pub use client::{DecryptedRecord, VaultClient};
pub use crypto::{MasterKey, Salt};
pub use envelope::{DECRYPTION_FAILED, Decrypted};
pub use error::{Result, VaultError};
pub use record::{NewVaultRecord, PlainRecord, VaultRecord};
pub use session::{FileSessionStorage, MemorySessionStorage, Session, SessionStorage};
