//! Subcommand handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use lockbox_store::StoreError;
use lockbox_vault::generator::{self, GeneratorOptions};
use lockbox_vault::record::{format_tags, parse_tags};
use lockbox_vault::{DECRYPTION_FAILED, PlainRecord, VaultError};
use tracing::{info, warn};

use crate::cli::{EntryArgs, GenerateArgs};
use crate::config::Config;
use crate::context::Context;
use crate::prompt;

const MASK: &str = "********";

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

pub async fn signup(ctx: &Context, email: &str) -> Result<()> {
    let password = prompt::new_master_password()?;
    match ctx.auth.signup(email, &password).await {
        Ok(account) => {
            info!(account_id = %account.id, "signed up");
            println!("Account created for {}. Run `lockbox login --email {}`.", account.email, account.email);
            Ok(())
        }
        Err(StoreError::Conflict { .. }) => bail!("an account for {email} already exists"),
        Err(e) => Err(e).context("signup failed"),
    }
}

/// Log in, keep the token, and unlock with the same password.
pub async fn login(ctx: &Context, email: &str) -> Result<()> {
    let password = prompt::master_password()?;
    let login = ctx.auth.login(email, &password).await.map_err(|e| match e {
        StoreError::Unauthorized(_) => anyhow::anyhow!("invalid credentials"),
        other => anyhow::Error::new(other).context("login failed"),
    })?;
    ctx.save_token(&login.token)?;

    let mut client = ctx.client();
    client.unlock(&login.token, &password).await?;

    println!(
        "Logged in. Vault unlocked until logout (token expires {}).",
        login.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

/// Forget the local key and token, then revoke the token server-side.
///
/// Revocation is best-effort: a busy or broken database must not leave the
/// master key behind on disk.
pub async fn logout(ctx: &Context) -> Result<()> {
    let token = ctx.load_token().unwrap_or_else(|e| {
        warn!(error = %e, "could not read stored token");
        None
    });
    ctx.clear_session_key()?;
    ctx.clear_token()?;

    if let Some(token) = token
        && let Err(e) = ctx.auth.logout(&token).await
    {
        warn!(error = %e, "failed to revoke token");
    }
    if let Err(e) = ctx.auth.purge_expired().await {
        warn!(error = %e, "failed to purge expired tokens");
    }

    println!("Logged out.");
    Ok(())
}

pub async fn unlock(ctx: &Context) -> Result<()> {
    let token = ctx.require_token()?;
    let password = prompt::master_password()?;

    let mut client = ctx.client();
    client.unlock(&token, &password).await.map_err(expired)?;
    println!("Vault unlocked.");
    Ok(())
}

pub fn lock(ctx: &Context) -> Result<()> {
    ctx.clear_session_key()?;
    println!("Vault locked.");
    Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
    let Some(token) = ctx.load_token()? else {
        println!("Not logged in.");
        return Ok(());
    };

    let mut client = ctx.client();
    match client.resume(&token).await {
        Ok(true) => println!("Logged in as {}. Vault unlocked.", account_label(&client)),
        Ok(false) => println!("Logged in as {}. Vault locked.", account_label(&client)),
        Err(VaultError::Unauthorized { .. }) => println!("Session expired. Log in again."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn account_label(client: &lockbox_vault::VaultClient) -> String {
    client
        .account()
        .map_or_else(|| "unknown".to_string(), ToString::to_string)
}

fn expired(err: VaultError) -> anyhow::Error {
    match err {
        VaultError::Unauthorized { .. } => {
            anyhow::anyhow!("session expired. Run `lockbox login --email <email>` again.")
        }
        other => other.into(),
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

pub async fn list(ctx: &Context, search: &str, show_passwords: bool) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    let records = client.list(search).await?;

    if records.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    for record in &records {
        let plain = &record.plain;
        let password = if show_passwords || plain.password == DECRYPTION_FAILED {
            plain.password.as_str()
        } else {
            MASK
        };
        println!(
            "{}  {:<24} {:<24} {:<10} {}",
            record.id,
            plain.title,
            plain.username,
            password,
            format_tags(&plain.tags)
        );
    }
    println!("{} entries", records.len());
    Ok(())
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    let plain = client.get(id).await?;

    println!("Title:    {}", plain.title);
    println!("URL:      {}", plain.url);
    println!("Username: {}", plain.username);
    println!("Password: {}", plain.password);
    println!("Tags:     {}", format_tags(&plain.tags));
    if !plain.notes.is_empty() {
        println!("Notes:\n{}", plain.notes);
    }
    Ok(())
}

pub async fn add(ctx: &Context, entry: EntryArgs) -> Result<()> {
    let client = ctx.unlocked_client().await?;

    let Some(title) = entry.title.clone().filter(|t| !t.trim().is_empty()) else {
        bail!("--title is required");
    };
    let password = match (&entry.password, entry.generate) {
        (_, true) => generator::generate(&ctx.config.generator)?,
        (Some(password), false) => password.clone(),
        (None, false) => prompt::secret("Entry password")?.to_string(),
    };

    let plain = PlainRecord {
        title,
        url: entry.url.unwrap_or_default(),
        username: entry.username.unwrap_or_default(),
        password,
        notes: entry.notes.unwrap_or_default(),
        tags: entry.tags.as_deref().map(parse_tags).unwrap_or_default(),
    };

    let created = client.add(&plain).await?;
    println!("Added {} ({}).", plain.title, created.id);
    if entry.generate {
        println!("Generated password: {}", plain.password);
    }
    Ok(())
}

pub async fn edit(ctx: &Context, id: &str, entry: EntryArgs) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    let current = client.get(id).await?;
    let generated = entry.generate;
    let updated = merge(current, entry, &ctx.config.generator)?;

    client.edit(id, &updated).await?;
    println!("Updated {id}.");
    if generated {
        println!("Generated password: {}", updated.password);
    }
    Ok(())
}

/// Overlay the given fields onto `current`. Edits are full replacements, so
/// undecryptable fields must not be written back as the placeholder.
fn merge(current: PlainRecord, entry: EntryArgs, options: &GeneratorOptions) -> Result<PlainRecord> {
    let password = if entry.generate {
        generator::generate(options)?
    } else {
        entry.password.unwrap_or(current.password)
    };

    let merged = PlainRecord {
        title: entry.title.unwrap_or(current.title),
        url: entry.url.unwrap_or(current.url),
        username: entry.username.unwrap_or(current.username),
        password,
        notes: entry.notes.unwrap_or(current.notes),
        tags: entry.tags.as_deref().map(parse_tags).unwrap_or(current.tags),
    };

    if [&merged.username, &merged.password, &merged.notes]
        .iter()
        .any(|field| field.as_str() == DECRYPTION_FAILED)
    {
        bail!("entry could not be decrypted with the current key; refusing to overwrite it");
    }
    Ok(merged)
}

pub async fn delete(ctx: &Context, id: &str) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    client.delete(id).await?;
    println!("Deleted {id}.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

pub async fn export(ctx: &Context, dir: Option<PathBuf>) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    let dir = dir.unwrap_or_else(|| ctx.config.data_dir.clone());
    let path = client
        .export_to(&dir, backup_date(chrono::Utc::now()))
        .await
        .context("export failed")?;

    println!("Backup written to {}", path.display());
    Ok(())
}

/// Backups are named by their UTC calendar date.
fn backup_date(now: chrono::DateTime<chrono::Utc>) -> chrono::NaiveDate {
    now.date_naive()
}

pub async fn import(ctx: &Context, file: &Path) -> Result<()> {
    let client = ctx.unlocked_client().await?;
    match client.import_from(file).await {
        Ok(report) => {
            println!("Imported {} entries.", report.created);
            Ok(())
        }
        Err(VaultError::ImportAborted { submitted, reason }) => bail!(
            "import stopped after {submitted} entries: {reason}. Entries already imported were kept."
        ),
        Err(e) => Err(e).with_context(|| format!("could not import {}", file.display())),
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub fn generate(config: &Config, args: &GenerateArgs) -> Result<()> {
    let options = generator_options(config.generator, args);
    println!("{}", generator::generate(&options)?);
    Ok(())
}

fn generator_options(defaults: GeneratorOptions, args: &GenerateArgs) -> GeneratorOptions {
    GeneratorOptions {
        length: args.length.unwrap_or(defaults.length),
        include_numbers: defaults.include_numbers && !args.no_numbers,
        include_symbols: defaults.include_symbols && !args.no_symbols,
        exclude_lookalikes: defaults.exclude_lookalikes && !args.allow_lookalikes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> PlainRecord {
        PlainRecord {
            title: "Mail".into(),
            url: "https://mail.example".into(),
            username: "me".into(),
            password: "old".into(),
            notes: "n".into(),
            tags: vec!["personal".into()],
        }
    }

    #[test]
    fn merge_keeps_omitted_fields() {
        let entry = EntryArgs {
            password: Some("new".into()),
            tags: Some("work, mail".into()),
            ..EntryArgs::default()
        };
        let merged = merge(current(), entry, &GeneratorOptions::default()).unwrap();

        assert_eq!(merged.title, "Mail");
        assert_eq!(merged.password, "new");
        assert_eq!(merged.tags, vec!["work", "mail"]);
    }

    #[test]
    fn merge_generates_password() {
        let entry = EntryArgs {
            generate: true,
            ..EntryArgs::default()
        };
        let merged = merge(current(), entry, &GeneratorOptions::default()).unwrap();
        assert_eq!(merged.password.len(), 16);
        assert_ne!(merged.password, "old");
    }

    #[test]
    fn merge_refuses_to_persist_placeholder() {
        let mut broken = current();
        broken.notes = DECRYPTION_FAILED.into();

        let entry = EntryArgs {
            title: Some("Renamed".into()),
            ..EntryArgs::default()
        };
        assert!(merge(broken, entry, &GeneratorOptions::default()).is_err());
    }

    #[test]
    fn generator_flags_narrow_config_defaults() {
        let args = GenerateArgs {
            length: Some(40),
            no_symbols: true,
            ..GenerateArgs::default()
        };
        let options = generator_options(GeneratorOptions::default(), &args);

        assert_eq!(options.length, 40);
        assert!(!options.include_symbols);
        assert!(options.include_numbers);
        assert!(options.exclude_lookalikes);
    }

    #[test]
    fn backup_date_uses_utc_calendar_day() {
        use chrono::TimeZone;

        let late = chrono::FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 12, 31, 22, 30, 0)
            .unwrap();
        let date = backup_date(late.with_timezone(&chrono::Utc));
        assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn logout_clears_local_state_when_revocation_fails() {
        use lockbox_store::Database;
        use lockbox_vault::FileSessionStorage;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let ctx = Context::open(config).await.unwrap();

        ctx.auth.signup("me@example.com", "pw").await.unwrap();
        let login = ctx.auth.login("me@example.com", "pw").await.unwrap();
        ctx.save_token(&login.token).unwrap();
        ctx.client().unlock(&login.token, "pw").await.unwrap();

        let key_file = FileSessionStorage::default_path(&ctx.config.data_dir);
        assert!(key_file.exists());

        let other = Database::open(ctx.config.db_path()).unwrap();
        other
            .execute(|conn| Ok(conn.execute_batch("DROP TABLE tokens;")?))
            .await
            .unwrap();

        logout(&ctx).await.unwrap();

        assert!(!key_file.exists());
        assert!(ctx.load_token().unwrap().is_none());
    }
}
