//! # lockbox-store
//!
//! SQLite persistence for Lockbox: accounts, bearer tokens and vault
//! records in wire form. Implements the collaborator traits the vault core
//! consumes, so a [`lockbox_vault::VaultClient`] can run fully locally.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  LocalAuth (AccountStore + TokenService)      │
//! │  SqliteRecordStore (RecordStore)              │
//! ├───────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking)      │
//! │  Migrations (versioned, transactional)        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ```ignore
//! use lockbox_store::{Database, LocalAuth, SqliteRecordStore};
//!
//! let db = Database::open_and_migrate("data/lockbox.db").await?;
//! let auth = LocalAuth::new(db.clone());
//! let records = SqliteRecordStore::new(db);
//! ```

pub mod auth;
pub mod db;
pub mod error;
pub mod migration;
pub mod records;

pub use auth::{Account, LocalAuth, Login};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use records::SqliteRecordStore;
