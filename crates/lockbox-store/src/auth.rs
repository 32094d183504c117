//! Local accounts and bearer tokens.
//!
//! [`LocalAuth`] is a self-contained stand-in for a hosted auth service:
//! signup stores a salted PBKDF2 login hash next to a random encryption salt,
//! and login issues an opaque random bearer token that expires after
//! [`DEFAULT_TOKEN_TTL_HOURS`]. The login hash and the encryption salt are
//! independent, so the stored hash cannot unlock the vault.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use lockbox_vault::collab::{AccountId, AccountStore, SessionToken, TokenService};
use lockbox_vault::crypto::{self, Salt};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// How long a bearer token stays valid, in hours.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Random bytes in a login-hash salt.
const LOGIN_SALT_LEN: usize = 16;

/// Random bytes in a bearer token.
const TOKEN_LEN: usize = 32;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// An account as visible to callers. The login hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub email: String,
    /// Hex-encoded salt for master key derivation.
    pub encryption_salt: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Login {
    pub account: AccountId,
    pub token: SessionToken,
    pub encryption_salt: Salt,
    pub expires_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Login hashes
// ═══════════════════════════════════════════════════════════════════════

/// `base64(salt):base64(hash)`.
fn hash_login_password(password: &str) -> StoreResult<String> {
    let salt = crypto::random_bytes(LOGIN_SALT_LEN)?;
    let hash = crypto::hash_password(password, &salt);
    Ok(format!("{}:{}", BASE64.encode(&salt), BASE64.encode(hash)))
}

fn verify_login_password(password: &str, stored: &str) -> StoreResult<bool> {
    let (salt, hash) = stored
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidArgument("malformed password hash".into()))?;

    let salt = BASE64
        .decode(salt)
        .map_err(|e| StoreError::InvalidArgument(format!("invalid salt encoding: {e}")))?;
    let hash = BASE64
        .decode(hash)
        .map_err(|e| StoreError::InvalidArgument(format!("invalid hash encoding: {e}")))?;

    Ok(crypto::verify_password(password, &salt, &hash))
}

/// Well-formed login hash that no password matches. Unknown emails are
/// checked against it so they cost the same PBKDF2 work as a wrong password.
const UNKNOWN_ACCOUNT_HASH: &str = "AAAAAAAAAAAAAAAAAAAAAA==:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

fn invalid_credentials() -> StoreError {
    StoreError::Unauthorized("invalid credentials".into())
}

// ═══════════════════════════════════════════════════════════════════════
//  LocalAuth
// ═══════════════════════════════════════════════════════════════════════

/// Account and token service backed by the local database.
#[derive(Debug, Clone)]
pub struct LocalAuth {
    db: Database,
    token_ttl: Duration,
}

impl LocalAuth {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            token_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    /// Override the bearer token lifetime.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Register a new account with a fresh encryption salt.
    ///
    /// Fails with [`StoreError::Conflict`] if `email` is taken.
    #[instrument(skip(self, password))]
    pub async fn signup(&self, email: &str, password: &str) -> StoreResult<Account> {
        let email = email.trim().to_string();
        if email.is_empty() || password.is_empty() {
            return Err(StoreError::InvalidArgument(
                "email and password are required".into(),
            ));
        }

        let password = password.to_string();
        let account = Account {
            id: Uuid::now_v7().to_string(),
            email,
            encryption_salt: Salt::generate()?.to_hex(),
            created_at: Utc::now(),
        };

        let row = account.clone();
        self.db
            .execute(move |conn| {
                let taken: Option<String> = conn
                    .query_row(
                        "SELECT id FROM accounts WHERE email = ?1",
                        [&row.email],
                        |r| r.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    return Err(StoreError::Conflict {
                        entity: "account",
                        id: row.email,
                    });
                }

                let password_hash = hash_login_password(&password)?;
                let now = row.created_at.timestamp_millis();
                conn.execute(
                    "INSERT INTO accounts (id, email, password_hash, encryption_salt, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![row.id, row.email, password_hash, row.encryption_salt, now],
                )?;
                Ok(())
            })
            .await?;

        info!(account_id = %account.id, "account created");
        Ok(account)
    }

    /// Check credentials and issue a bearer token.
    ///
    /// Unknown email and wrong password fail identically.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> StoreResult<Login> {
        let email = email.trim().to_string();
        let password = password.to_string();
        let token = hex::encode(crypto::random_bytes(TOKEN_LEN)?);
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        let issued = token.clone();
        let (account_id, salt_hex) = self
            .db
            .execute(move |conn| {
                let row: Option<(String, String, String)> = conn
                    .query_row(
                        "SELECT id, password_hash, encryption_salt FROM accounts WHERE email = ?1",
                        [&email],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .optional()?;
                let Some((account_id, password_hash, salt_hex)) = row else {
                    verify_login_password(&password, UNKNOWN_ACCOUNT_HASH)?;
                    return Err(invalid_credentials());
                };

                if !verify_login_password(&password, &password_hash)? {
                    return Err(invalid_credentials());
                }

                conn.execute(
                    "INSERT INTO tokens (token, account_id, expires_at, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        issued,
                        account_id,
                        expires_at.timestamp_millis(),
                        now.timestamp_millis()
                    ],
                )?;
                Ok((account_id, salt_hex))
            })
            .await
            .inspect_err(|e| warn!(error = %e, "login rejected"))?;

        info!(%account_id, "login succeeded");
        Ok(Login {
            account: AccountId::new(account_id),
            token: SessionToken::new(token),
            encryption_salt: Salt::from_hex(&salt_hex)?,
            expires_at,
        })
    }

    /// The account a live token belongs to.
    #[instrument(skip(self))]
    pub async fn verify_token(&self, token: &SessionToken) -> StoreResult<AccountId> {
        let token = token.as_str().to_string();
        let now = Utc::now().timestamp_millis();

        let account = self
            .db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT account_id FROM tokens WHERE token = ?1 AND expires_at > ?2",
                        rusqlite::params![token, now],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;

        account
            .map(AccountId::new)
            .ok_or_else(|| StoreError::Unauthorized("token is invalid or expired".into()))
    }

    /// Revoke a token. Revoking an unknown token is not an error.
    #[instrument(skip(self))]
    pub async fn logout(&self, token: &SessionToken) -> StoreResult<()> {
        let token = token.as_str().to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM tokens WHERE token = ?1", [&token])?;
                Ok(())
            })
            .await
    }

    /// Delete expired tokens, returning how many were removed.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Utc::now().timestamp_millis();
        let removed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", [now])?)
            })
            .await?;
        debug!(removed, "purged expired tokens");
        Ok(removed)
    }

    /// The encryption salt of `account`.
    #[instrument(skip(self))]
    pub async fn account_salt(&self, account: &AccountId) -> StoreResult<Salt> {
        let id = account.as_str().to_string();
        let salt_hex = self
            .db
            .execute(move |conn| {
                let salt = conn
                    .query_row(
                        "SELECT encryption_salt FROM accounts WHERE id = ?1",
                        [&id],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?;
                salt.ok_or(StoreError::NotFound {
                    entity: "account",
                    id,
                })
            })
            .await?;

        Ok(Salt::from_hex(&salt_hex)?)
    }
}

#[async_trait]
impl AccountStore for LocalAuth {
    async fn salt(&self, account: &AccountId) -> lockbox_vault::Result<Salt> {
        Ok(self.account_salt(account).await?)
    }
}

#[async_trait]
impl TokenService for LocalAuth {
    async fn verify(&self, token: &SessionToken) -> lockbox_vault::Result<AccountId> {
        Ok(self.verify_token(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn auth() -> LocalAuth {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        LocalAuth::new(db)
    }

    #[test]
    fn login_hash_roundtrip() {
        let stored = hash_login_password("correct horse").unwrap();
        assert!(verify_login_password("correct horse", &stored).unwrap());
        assert!(!verify_login_password("wrong horse", &stored).unwrap());
        assert!(verify_login_password("x", "no-separator").is_err());
    }

    #[tokio::test]
    async fn signup_login_verify() {
        let auth = auth().await;
        let account = auth.signup("a@example.com", "pw").await.unwrap();
        assert_eq!(account.encryption_salt.len(), 32);

        let login = auth.login("a@example.com", "pw").await.unwrap();
        assert_eq!(login.account.as_str(), account.id);
        assert_eq!(login.encryption_salt.to_hex(), account.encryption_salt);

        let verified = auth.verify_token(&login.token).await.unwrap();
        assert_eq!(verified, login.account);
        assert_eq!(
            auth.account_salt(&verified).await.unwrap(),
            login.encryption_salt
        );
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let auth = auth().await;
        auth.signup("a@example.com", "pw").await.unwrap();
        assert!(matches!(
            auth.signup("a@example.com", "other").await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn bad_credentials_are_indistinguishable() {
        let auth = auth().await;
        auth.signup("a@example.com", "pw").await.unwrap();

        let wrong_pw = auth.login("a@example.com", "nope").await.unwrap_err();
        let unknown = auth.login("b@example.com", "pw").await.unwrap_err();
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
        assert!(matches!(unknown, StoreError::Unauthorized(_)));
    }

    #[test]
    fn unknown_account_hash_runs_full_verification() {
        assert!(!verify_login_password("pw", UNKNOWN_ACCOUNT_HASH).unwrap());
        assert!(!verify_login_password("", UNKNOWN_ACCOUNT_HASH).unwrap());

        let (salt, hash) = UNKNOWN_ACCOUNT_HASH.split_once(':').unwrap();
        assert_eq!(BASE64.decode(salt).unwrap().len(), LOGIN_SALT_LEN);
        assert_eq!(BASE64.decode(hash).unwrap().len(), crypto::KEY_LEN);
    }

    #[tokio::test]
    async fn expired_and_revoked_tokens_fail() {
        let auth = auth().await.with_token_ttl(Duration::milliseconds(-1));
        auth.signup("a@example.com", "pw").await.unwrap();

        let expired = auth.login("a@example.com", "pw").await.unwrap();
        assert!(matches!(
            auth.verify_token(&expired.token).await,
            Err(StoreError::Unauthorized(_))
        ));
        assert_eq!(auth.purge_expired().await.unwrap(), 1);

        let auth = auth.with_token_ttl(Duration::hours(DEFAULT_TOKEN_TTL_HOURS));
        let live = auth.login("a@example.com", "pw").await.unwrap();
        auth.logout(&live.token).await.unwrap();
        assert!(auth.verify_token(&live.token).await.is_err());
    }
}
