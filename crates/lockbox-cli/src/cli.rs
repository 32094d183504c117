//! CLI argument definitions for Lockbox.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Lockbox: a password vault encrypted on the client.
#[derive(Parser)]
#[command(
    name = "lockbox",
    version,
    about = "Lockbox -- client-side encrypted password vault",
    long_about = "Stores credentials encrypted with a key derived from your master password. \
                  The key never leaves this machine; the store only sees ciphertext."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true, default_value = "lockbox.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account.
    Signup {
        #[arg(long, short)]
        email: String,
    },

    /// Log in and unlock the vault with the same password.
    Login {
        #[arg(long, short)]
        email: String,
    },

    /// Revoke the stored token and lock the vault.
    Logout,

    /// Unlock the vault for the logged-in account.
    Unlock,

    /// Forget the master key without logging out.
    Lock,

    /// Show whether a token is stored and the vault is unlocked.
    Status,

    /// List entries, optionally filtered by title, url or tag.
    List {
        #[arg(long, short)]
        search: Option<String>,

        /// Print passwords instead of masking them.
        #[arg(long)]
        show_passwords: bool,
    },

    /// Show one entry in full.
    Show { id: String },

    /// Add an entry.
    Add(EntryArgs),

    /// Replace the fields given on an existing entry.
    Edit {
        id: String,

        #[command(flatten)]
        entry: EntryArgs,
    },

    /// Delete an entry.
    Delete { id: String },

    /// Write an encrypted backup of every entry.
    Export {
        /// Directory for the dated backup file. Defaults to the data directory.
        #[arg(long, short)]
        dir: Option<PathBuf>,
    },

    /// Restore entries from a backup file.
    Import { file: PathBuf },

    /// Generate a random password.
    Generate(GenerateArgs),
}

/// Entry fields. On `edit`, omitted fields keep their current value.
#[derive(Args, Default)]
pub struct EntryArgs {
    #[arg(long, short)]
    pub title: Option<String>,

    #[arg(long)]
    pub url: Option<String>,

    #[arg(long, short)]
    pub username: Option<String>,

    /// Password for the entry. Prompted for when omitted on `add`.
    #[arg(long, short)]
    pub password: Option<String>,

    #[arg(long, short)]
    pub notes: Option<String>,

    /// Comma-separated tags.
    #[arg(long)]
    pub tags: Option<String>,

    /// Fill the password with a generated one.
    #[arg(long, short, conflicts_with = "password")]
    pub generate: bool,
}

#[derive(Args, Default)]
pub struct GenerateArgs {
    #[arg(long, short)]
    pub length: Option<usize>,

    #[arg(long)]
    pub no_numbers: bool,

    #[arg(long)]
    pub no_symbols: bool,

    /// Allow characters such as `l`, `1`, `O` and `0`.
    #[arg(long)]
    pub allow_lookalikes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_edit_with_partial_fields() {
        let cli = Cli::parse_from(["lockbox", "edit", "abc", "--title", "New", "--tags", "a,b"]);
        match cli.command {
            Commands::Edit { id, entry } => {
                assert_eq!(id, "abc");
                assert_eq!(entry.title.as_deref(), Some("New"));
                assert!(entry.username.is_none());
                assert_eq!(entry.tags.as_deref(), Some("a,b"));
            }
            _ => panic!("expected edit"),
        }
    }

    #[test]
    fn password_and_generate_conflict() {
        let result = Cli::try_parse_from(["lockbox", "add", "-t", "x", "-p", "pw", "--generate"]);
        assert!(result.is_err());
    }
}
