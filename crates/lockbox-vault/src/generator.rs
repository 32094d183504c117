//! Random password generation.

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBERS: &str = "0123456789";
const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
const LOOKALIKES: &str = "Il1O0";

/// Shortest password the generator produces.
pub const MIN_LENGTH: usize = 8;

/// Longest password the generator produces.
pub const MAX_LENGTH: usize = 64;

/// What goes into a generated password. Letters are always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    pub length: usize,
    pub include_numbers: bool,
    pub include_symbols: bool,
    /// Leave out `I`, `l`, `1`, `O` and `0`.
    pub exclude_lookalikes: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            length: 16,
            include_numbers: true,
            include_symbols: true,
            exclude_lookalikes: true,
        }
    }
}

impl GeneratorOptions {
    /// The characters a password may be drawn from.
    pub fn charset(&self) -> Vec<u8> {
        let mut charset = String::from(LETTERS);
        if self.include_numbers {
            charset.push_str(NUMBERS);
        }
        if self.include_symbols {
            charset.push_str(SYMBOLS);
        }
        if self.exclude_lookalikes {
            charset.retain(|c| !LOOKALIKES.contains(c));
        }
        charset.into_bytes()
    }
}

/// Generate a password, drawing each character uniformly from the charset.
///
/// # Errors
///
/// Returns [`VaultError::InvalidArgument`] if the length is outside
/// [`MIN_LENGTH`]..=[`MAX_LENGTH`].
pub fn generate(options: &GeneratorOptions) -> Result<String> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&options.length) {
        return Err(VaultError::InvalidArgument(format!(
            "password length must be between {MIN_LENGTH} and {MAX_LENGTH}, got {}",
            options.length
        )));
    }

    let charset = options.charset();
    // Rejection sampling: bytes at or above `limit` would bias the modulo.
    let limit = 256 - (256 % charset.len());
    let rng = SystemRandom::new();

    let mut password = String::with_capacity(options.length);
    let mut buf = [0u8; 64];
    while password.len() < options.length {
        rng.fill(&mut buf).map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random bytes".into(),
        })?;
        for &byte in &buf {
            if password.len() == options.length {
                break;
            }
            if usize::from(byte) < limit {
                password.push(char::from(charset[usize::from(byte) % charset.len()]));
            }
        }
    }

    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let password = generate(&GeneratorOptions::default()).unwrap();
        assert_eq!(password.len(), 16);
        assert!(!password.chars().any(|c| LOOKALIKES.contains(c)));
    }

    #[test]
    fn letters_only() {
        let options = GeneratorOptions {
            length: 64,
            include_numbers: false,
            include_symbols: false,
            exclude_lookalikes: false,
        };
        let password = generate(&options).unwrap();
        assert_eq!(password.len(), 64);
        assert!(password.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn charset_composition() {
        let mut options = GeneratorOptions {
            exclude_lookalikes: false,
            ..GeneratorOptions::default()
        };
        assert_eq!(options.charset().len(), 52 + 10 + SYMBOLS.len());

        options.exclude_lookalikes = true;
        assert_eq!(options.charset().len(), 52 + 10 + SYMBOLS.len() - LOOKALIKES.len());
    }

    #[test]
    fn length_bounds_enforced() {
        for length in [0, 7, 65] {
            let options = GeneratorOptions {
                length,
                ..GeneratorOptions::default()
            };
            assert!(matches!(
                generate(&options),
                Err(VaultError::InvalidArgument(_))
            ));
        }
        let options = GeneratorOptions {
            length: MIN_LENGTH,
            ..GeneratorOptions::default()
        };
        assert_eq!(generate(&options).unwrap().len(), MIN_LENGTH);
    }

    #[test]
    fn successive_passwords_differ() {
        let options = GeneratorOptions::default();
        assert_ne!(generate(&options).unwrap(), generate(&options).unwrap());
    }
}
