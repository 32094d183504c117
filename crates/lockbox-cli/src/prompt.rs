//! Password acquisition via TTY prompt or `LOCKBOX_MASTER_PASSWORD`.

use std::io::IsTerminal;

use anyhow::{Result, bail};
use zeroize::Zeroizing;

/// Environment variable holding the master password for headless use.
pub const MASTER_PASSWORD_ENV: &str = "LOCKBOX_MASTER_PASSWORD";

/// The master password, from the environment or an interactive prompt.
pub fn master_password() -> Result<Zeroizing<String>> {
    if let Some(password) = from_env(std::env::var(MASTER_PASSWORD_ENV).ok()) {
        return Ok(password);
    }
    secret("Master password")
}

/// A new master password, confirmed when typed interactively.
pub fn new_master_password() -> Result<Zeroizing<String>> {
    if let Some(password) = from_env(std::env::var(MASTER_PASSWORD_ENV).ok()) {
        return Ok(password);
    }

    let first = secret("New master password")?;
    let second = secret("Confirm master password")?;
    if *first != *second {
        bail!("passwords do not match");
    }
    Ok(first)
}

/// Prompt for a secret on the terminal without echo.
pub fn secret(label: &str) -> Result<Zeroizing<String>> {
    if !std::io::stdin().is_terminal() {
        bail!("{label} required. Set {MASTER_PASSWORD_ENV} or run interactively.");
    }

    eprint!("{label}: ");
    let value = Zeroizing::new(rpassword::read_password()?);
    if value.is_empty() {
        bail!("empty {} not allowed", label.to_lowercase());
    }
    Ok(value)
}

fn from_env(value: Option<String>) -> Option<Zeroizing<String>> {
    value.filter(|v| !v.is_empty()).map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_value_is_used_when_present() {
        assert_eq!(
            from_env(Some("hunter2".into())).as_deref().map(String::as_str),
            Some("hunter2")
        );
    }

    #[test]
    fn empty_env_value_is_ignored() {
        assert!(from_env(Some(String::new())).is_none());
        assert!(from_env(None).is_none());
    }
}
