// ABOUTME: Hex-encoded content hash used in labels and drift comparisons.
// ABOUTME: Wraps a fixed-width hex string so raw digest bytes and labels are never mixed up.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigHashError {
    #[error("config hash must be hex-encoded, found non-hex character '{0}'")]
    InvalidChar(char),

    #[error("config hash cannot be empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigHash(String);

impl ConfigHash {
    /// Wraps a pre-computed hex digest. `hash::service_hash` and friends are the
    /// usual producers; this constructor just validates the encoding.
    pub fn from_hex(value: impl Into<String>) -> Result<Self, ConfigHashError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ConfigHashError::Empty);
        }
        if let Some(c) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ConfigHashError::InvalidChar(c));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_hex() {
        assert!(matches!(
            ConfigHash::from_hex("not-hex!"),
            Err(ConfigHashError::InvalidChar(_))
        ));
    }

    #[test]
    fn accepts_lowercase_hex() {
        assert_eq!(ConfigHash::from_hex("deadbeef").unwrap().as_str(), "deadbeef");
    }
}
