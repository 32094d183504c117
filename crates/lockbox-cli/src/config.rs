//! Configuration for the `lockbox` binary.
//!
//! Read from an optional `lockbox.toml`; a missing file means defaults.
//! `LOCKBOX_DATA_DIR` and `LOCKBOX_LOG` override the file, and `.env` is
//! loaded into the environment before either is consulted.
//!
//! ```toml
//! data_dir = "/home/me/.lockbox"
//! log_level = "info"
//!
//! [generator]
//! length = 24
//! include_symbols = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lockbox_vault::generator::GeneratorOptions;
use serde::Deserialize;

pub const DATA_DIR_ENV: &str = "LOCKBOX_DATA_DIR";
pub const LOG_ENV: &str = "LOCKBOX_LOG";

const DB_FILE: &str = "lockbox.db";
const TOKEN_FILE: &str = "token";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds the database, the session key and the bearer token.
    pub data_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Defaults for `lockbox generate` and `add --generate`.
    pub generator: GeneratorOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lockbox"),
            log_level: "warn".into(),
            generator: GeneratorOptions::default(),
        }
    }
}

impl Config {
    /// Load `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = get(LOG_ENV) {
            self.log_level = level;
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_FILE)
    }
}
