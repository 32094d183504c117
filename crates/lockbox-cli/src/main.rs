//! CLI entry point for Lockbox.
//!
//! This binary provides the `lockbox` command: account signup and login,
//! locking, entry management, encrypted backups and password generation.

mod cli;
mod commands;
mod config;
mod context;
mod prompt;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::context::Context;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_tracing(&config.log_level);

    // Generation needs no store.
    if let Commands::Generate(args) = &cli.command {
        return commands::generate(&config, args);
    }

    let ctx = Context::open(config).await?;

    match cli.command {
        Commands::Signup { email } => commands::signup(&ctx, &email).await,
        Commands::Login { email } => commands::login(&ctx, &email).await,
        Commands::Logout => commands::logout(&ctx).await,
        Commands::Unlock => commands::unlock(&ctx).await,
        Commands::Lock => commands::lock(&ctx),
        Commands::Status => commands::status(&ctx).await,
        Commands::List {
            search,
            show_passwords,
        } => commands::list(&ctx, search.as_deref().unwrap_or(""), show_passwords).await,
        Commands::Show { id } => commands::show(&ctx, &id).await,
        Commands::Add(entry) => commands::add(&ctx, entry).await,
        Commands::Edit { id, entry } => commands::edit(&ctx, &id, entry).await,
        Commands::Delete { id } => commands::delete(&ctx, &id).await,
        Commands::Export { dir } => commands::export(&ctx, dir).await,
        Commands::Import { file } => commands::import(&ctx, &file).await,
        Commands::Generate(_) => Ok(()),
    }
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
