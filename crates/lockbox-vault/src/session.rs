//! Session key store: the locked/unlocked state machine.
//!
//! [`SessionLockState`] is the pure state machine. [`Session`] wraps it with
//! an optional [`SessionStorage`] so that an unlocked key survives a reload of
//! the same client context (a page refresh, or the next CLI invocation) until
//! the user locks the vault.
//!
//! ```text
//!            unlock(password, salt)
//!   Locked ─────────────────────────▶ Unlocked(MasterKey)
//!      ▲                                   │
//!      └───────────── lock() ──────────────┘
//! ```
//!
//! The cached key is only reachable from inside this crate, through the
//! record codec and backup paths driven by [`crate::client::VaultClient`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypto::{self, KEY_LEN, MasterKey, NONCE_LEN_BYTES, Salt, TAG_LEN};
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Whether a master key is currently cached.
#[derive(Debug, Default)]
pub enum SessionLockState {
    #[default]
    Locked,
    Unlocked(MasterKey),
}

impl SessionLockState {
    /// Derive the key from `password` and `salt` and enter `Unlocked`.
    ///
    /// Any previously cached key is dropped (and zeroized) first.
    pub fn unlock(self, password: &str, salt: &Salt) -> Self {
        drop(self);
        Self::Unlocked(crypto::derive(password, salt))
    }

    /// Drop the cached key, if any, and enter `Locked`.
    pub fn lock(self) -> Self {
        drop(self);
        Self::Locked
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked(_))
    }

    fn key(&self) -> Option<&MasterKey> {
        match self {
            Self::Locked => None,
            Self::Unlocked(key) => Some(key),
        }
    }
}

// ---------------------------------------------------------------------------
// Ephemeral storage
// ---------------------------------------------------------------------------

/// Per-context key-value storage that lets an unlocked key survive a reload.
///
/// Implementations must be `Send + Sync` so a session can live inside async
/// tasks.
pub trait SessionStorage: Send + Sync {
    /// Load a previously stored key, or `None` if nothing is stored.
    fn load(&self) -> Result<Option<MasterKey>>;

    /// Store (or overwrite) the key.
    fn store(&self, key: &MasterKey) -> Result<()>;

    /// Remove the stored key. Succeeds if nothing is stored.
    fn clear(&self) -> Result<()>;
}

/// Process-local storage, gone when the process exits.
#[derive(Default)]
pub struct MemorySessionStorage {
    slot: Mutex<Option<MasterKey>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<MasterKey>>> {
        self.slot.lock().map_err(|e| VaultError::SessionStorage {
            reason: format!("mutex poisoned: {e}"),
        })
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<MasterKey>> {
        Ok(self.slot()?.as_ref().map(MasterKey::duplicate))
    }

    fn store(&self, key: &MasterKey) -> Result<()> {
        *self.slot()? = Some(key.duplicate());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slot()?.take();
        Ok(())
    }
}

/// Application salt mixed into the device-derived wrapping key. Changing it
/// invalidates every stored session key.
const DEVICE_SALT: &[u8; 32] = b"lockbox-session-storage-v1\x00\x00\x00\x00\x00\x00";

/// File-backed storage for one user on one machine.
///
/// The key is never written in the clear; it is wrapped with AES-256-GCM
/// under a key derived from machine and user identifiers. File layout:
///
/// ```text
/// [12 bytes: nonce]
/// [32 bytes: wrapped master key][16 bytes: GCM tag]
/// ```
pub struct FileSessionStorage {
    key_file: PathBuf,
}

impl FileSessionStorage {
    /// Store the session key at `key_file`. The file is created on first
    /// [`store`](SessionStorage::store).
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
        }
    }

    /// Default key file location: `<data_dir>/session.key`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("session.key")
    }

    pub fn path(&self) -> &Path {
        &self.key_file
    }

    fn device_key() -> Result<MasterKey> {
        let hostname = Self::hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let material = format!("{hostname}\u{0}{username}");
        let salt = Salt::from_bytes(DEVICE_SALT.to_vec())?;
        Ok(crypto::derive(&material, &salt))
    }

    fn hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<MasterKey>> {
        if !self.key_file.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&self.key_file)?;
        if data.len() != NONCE_LEN_BYTES + KEY_LEN + TAG_LEN {
            return Err(VaultError::SessionStorage {
                reason: "session key file is corrupted".into(),
            });
        }

        let (nonce_bytes, wrapped) = data.split_at(NONCE_LEN_BYTES);
        let mut nonce = [0u8; NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        let device_key = Self::device_key()?;
        let unwrapped = crypto::open(&nonce, wrapped, device_key.as_bytes()).ok_or_else(|| {
            VaultError::SessionStorage {
                reason: "session key file was written on another device or user".into(),
            }
        })?;
        let unwrapped = zeroize::Zeroizing::new(unwrapped);

        let bytes: [u8; KEY_LEN] =
            unwrapped
                .as_slice()
                .try_into()
                .map_err(|_| VaultError::SessionStorage {
                    reason: "session key has the wrong length".into(),
                })?;

        tracing::debug!(path = %self.key_file.display(), "loaded session key");
        Ok(Some(MasterKey::from_bytes(bytes)))
    }

    fn store(&self, key: &MasterKey) -> Result<()> {
        let device_key = Self::device_key()?;
        let (nonce, wrapped) = crypto::seal(key.as_bytes(), device_key.as_bytes())?;

        let mut data = Vec::with_capacity(NONCE_LEN_BYTES + wrapped.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&wrapped);

        if let Some(parent) = self.key_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_owner_only(&self.key_file, &data)?;

        tracing::debug!(path = %self.key_file.display(), "stored session key");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.key_file.exists() {
            std::fs::remove_file(&self.key_file)?;
            tracing::debug!(path = %self.key_file.display(), "cleared session key");
        }
        Ok(())
    }
}

/// Write `data` to `path`, readable and writable by the owner only.
///
/// A new file is created with mode 0600 so its contents are never visible
/// under a looser umask. An existing file is narrowed to 0600 before the
/// old contents are truncated.
fn write_owner_only(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client context's lock state plus its ephemeral storage.
pub struct Session {
    state: SessionLockState,
    storage: Option<Box<dyn SessionStorage>>,
}

impl Session {
    /// A locked session with no ephemeral storage.
    pub fn new() -> Self {
        Self {
            state: SessionLockState::Locked,
            storage: None,
        }
    }

    /// A locked session that persists its key to `storage` while unlocked.
    ///
    /// Still starts locked; call [`Session::resume`] to pick up a stored key.
    pub fn with_storage(storage: impl SessionStorage + 'static) -> Self {
        Self {
            state: SessionLockState::Locked,
            storage: Some(Box::new(storage)),
        }
    }

    /// Re-enter `Unlocked` from a key left in ephemeral storage by an earlier
    /// load of this context. Returns whether the session is now unlocked.
    pub fn resume(&mut self) -> Result<bool> {
        if self.state.is_unlocked() {
            return Ok(true);
        }
        let Some(storage) = &self.storage else {
            return Ok(false);
        };

        match storage.load()? {
            Some(key) => {
                self.state = SessionLockState::Unlocked(key);
                tracing::info!("session resumed from ephemeral storage");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Derive the master key and cache it.
    ///
    /// Always succeeds at the cryptographic level. A wrong password is only
    /// noticed later, when records decrypt to the failure placeholder.
    ///
    /// The key is cached only after ephemeral storage accepted it. If storing
    /// fails the session is left `Locked`.
    pub fn unlock(&mut self, password: &str, salt: &Salt) -> Result<()> {
        let state = std::mem::take(&mut self.state);
        let unlocked = state.unlock(password, salt);

        if let (Some(storage), Some(key)) = (&self.storage, unlocked.key()) {
            storage.store(key)?;
        }

        self.state = unlocked;
        tracing::info!("vault unlocked");
        Ok(())
    }

    /// Discard the cached key and clear ephemeral storage.
    pub fn lock(&mut self) -> Result<()> {
        let state = std::mem::take(&mut self.state);
        self.state = state.lock();

        if let Some(storage) = &self.storage {
            storage.clear()?;
        }

        tracing::info!("vault locked");
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.is_unlocked()
    }

    /// The cached key, or [`VaultError::Locked`].
    pub(crate) fn key(&self) -> Result<&MasterKey> {
        self.state.key().ok_or(VaultError::Locked)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("unlocked", &self.is_unlocked())
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn salt() -> Salt {
        Salt::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    #[test]
    fn state_machine_transitions() {
        let state = SessionLockState::default();
        assert!(!state.is_unlocked());

        let state = state.unlock("pw", &salt());
        assert!(state.is_unlocked());
        assert_eq!(state.key(), Some(&crypto::derive("pw", &salt())));

        let state = state.lock();
        assert!(!state.is_unlocked());
        assert!(state.key().is_none());
    }

    #[test]
    fn new_session_is_locked() {
        let session = Session::new();
        assert!(!session.is_unlocked());
        assert!(matches!(session.key(), Err(VaultError::Locked)));
    }

    #[test]
    fn unlock_then_lock_fails_closed() {
        let mut session = Session::new();
        session.unlock("pw", &salt()).unwrap();
        assert!(session.key().is_ok());

        session.lock().unwrap();
        assert!(matches!(session.key(), Err(VaultError::Locked)));
    }

    /// Storage shared between two sessions, standing in for a reload.
    struct Shared(Arc<MemorySessionStorage>);

    impl SessionStorage for Shared {
        fn load(&self) -> Result<Option<MasterKey>> {
            self.0.load()
        }
        fn store(&self, key: &MasterKey) -> Result<()> {
            self.0.store(key)
        }
        fn clear(&self) -> Result<()> {
            self.0.clear()
        }
    }

    #[test]
    fn resume_picks_up_stored_key_and_lock_clears_it() {
        let backing = Arc::new(MemorySessionStorage::new());

        let mut first = Session::with_storage(Shared(Arc::clone(&backing)));
        first.unlock("pw", &salt()).unwrap();

        let mut reloaded = Session::with_storage(Shared(Arc::clone(&backing)));
        assert!(!reloaded.is_unlocked());
        assert!(reloaded.resume().unwrap());
        assert_eq!(reloaded.key().unwrap(), first.key().unwrap());

        reloaded.lock().unwrap();
        assert!(backing.load().unwrap().is_none());

        let mut third = Session::with_storage(Shared(backing));
        assert!(!third.resume().unwrap());
    }

    /// Storage that rejects every write.
    struct ReadOnly;

    impl SessionStorage for ReadOnly {
        fn load(&self) -> Result<Option<MasterKey>> {
            Ok(None)
        }
        fn store(&self, _key: &MasterKey) -> Result<()> {
            Err(VaultError::SessionStorage {
                reason: "storage is read-only".into(),
            })
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unlock_stays_locked_when_storage_rejects_key() {
        let mut session = Session::with_storage(ReadOnly);

        let result = session.unlock("pw", &salt());
        assert!(matches!(result, Err(VaultError::SessionStorage { .. })));
        assert!(!session.is_unlocked());
        assert!(matches!(session.key(), Err(VaultError::Locked)));
    }

    #[test]
    fn resume_without_storage_stays_locked() {
        let mut session = Session::new();
        assert!(!session.resume().unwrap());
    }

    #[test]
    fn file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::new(FileSessionStorage::default_path(dir.path()));
        assert!(storage.load().unwrap().is_none());

        let key = MasterKey::random().unwrap();
        storage.store(&key).unwrap();

        let raw = std::fs::read(storage.path()).unwrap();
        assert!(!raw.windows(KEY_LEN).any(|w| w == key.as_bytes()));
        assert_eq!(storage.load().unwrap(), Some(key));

        storage.clear().unwrap();
        assert!(!storage.path().exists());
        storage.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_storage_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path().join("nested").join("session.key"));
        storage.store(&MasterKey::random().unwrap()).unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn file_storage_narrows_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path().join("session.key"));
        std::fs::write(storage.path(), b"stale").unwrap();
        std::fs::set_permissions(storage.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let key = MasterKey::random().unwrap();
        storage.store(&key).unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(storage.load().unwrap(), Some(key));
    }

    #[test]
    fn memory_storage_hands_out_copies() {
        let storage = MemorySessionStorage::new();
        let key = MasterKey::random().unwrap();
        storage.store(&key).unwrap();
        drop(key);

        let first = storage.load().unwrap().unwrap();
        let second = storage.load().unwrap().unwrap();
        assert_eq!(first, second);

        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_none());
        assert_eq!(first.to_hex(), second.to_hex());
    }

    #[test]
    fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path().join("session.key"));
        std::fs::write(storage.path(), b"garbage").unwrap();

        assert!(matches!(
            storage.load(),
            Err(VaultError::SessionStorage { .. })
        ));
    }
}
