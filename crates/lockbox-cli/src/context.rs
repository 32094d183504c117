//! Per-invocation state: opened stores, the stored bearer token, and a
//! vault client whose master key persists across invocations.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use lockbox_store::{Database, LocalAuth, SqliteRecordStore};
use lockbox_vault::collab::SessionToken;
use lockbox_vault::{FileSessionStorage, Session, SessionStorage, VaultClient};

use crate::config::Config;

pub struct Context {
    pub config: Config,
    pub auth: LocalAuth,
    records: Arc<SqliteRecordStore>,
}

impl Context {
    /// Open (and migrate) the database under the configured data directory.
    pub async fn open(config: Config) -> Result<Self> {
        let db_path = config.db_path();
        let db = Database::open_and_migrate(db_path.clone())
            .await
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        tracing::debug!(path = %db_path.display(), "store initialized");

        Ok(Self {
            auth: LocalAuth::new(db.clone()),
            records: Arc::new(SqliteRecordStore::new(db)),
            config,
        })
    }

    fn session_key_path(&self) -> PathBuf {
        FileSessionStorage::default_path(&self.config.data_dir)
    }

    /// A client whose key is kept in the data directory between runs.
    pub fn client(&self) -> VaultClient {
        let session = Session::with_storage(FileSessionStorage::new(self.session_key_path()));
        let auth = Arc::new(self.auth.clone());
        VaultClient::new(session, self.records.clone(), auth.clone(), auth)
    }

    /// A client for the logged-in account, unlocked from the stored key.
    pub async fn unlocked_client(&self) -> Result<VaultClient> {
        let token = self.require_token()?;
        let mut client = self.client();
        if !client.resume(&token).await? {
            bail!("vault is locked. Run `lockbox unlock` first.");
        }
        Ok(client)
    }

    /// Forget the master key without touching the token.
    pub fn clear_session_key(&self) -> Result<()> {
        FileSessionStorage::new(self.session_key_path()).clear()?;
        Ok(())
    }

    // -- Token file -----------------------------------------------------------

    pub fn load_token(&self) -> Result<Option<SessionToken>> {
        let path = self.config.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| SessionToken::new(token)))
    }

    pub fn require_token(&self) -> Result<SessionToken> {
        self.load_token()?
            .context("not logged in. Run `lockbox login --email <email>` first.")
    }

    pub fn save_token(&self, token: &SessionToken) -> Result<()> {
        let path = self.config.token_path();
        std::fs::create_dir_all(&self.config.data_dir)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Owner read/write only, from the moment the file exists.
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            options.mode(0o600);
            if path.exists() {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
            }
        }

        let mut file = options
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(token.as_str().as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn clear_token(&self) -> Result<()> {
        let path = self.config.token_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn context(dir: &std::path::Path) -> Context {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        Context::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn token_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        assert!(ctx.load_token().unwrap().is_none());
        assert!(ctx.require_token().is_err());

        ctx.save_token(&SessionToken::new("abc123")).unwrap();
        assert_eq!(ctx.load_token().unwrap().unwrap().as_str(), "abc123");

        ctx.clear_token().unwrap();
        assert!(ctx.load_token().unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = ctx.config.token_path();

        ctx.save_token(&SessionToken::new("first")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        ctx.save_token(&SessionToken::new("second")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(ctx.load_token().unwrap().unwrap().as_str(), "second");
    }

    #[tokio::test]
    async fn unlock_persists_across_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        ctx.auth.signup("me@example.com", "pw").await.unwrap();
        let login = ctx.auth.login("me@example.com", "pw").await.unwrap();
        ctx.save_token(&login.token).unwrap();
        assert!(ctx.unlocked_client().await.is_err());

        let mut client = ctx.client();
        client.unlock(&login.token, "pw").await.unwrap();
        drop(ctx);

        let ctx = context(dir.path()).await;
        assert!(ctx.unlocked_client().await.unwrap().is_unlocked());

        ctx.clear_session_key().unwrap();
        assert!(ctx.unlocked_client().await.is_err());
    }
}
