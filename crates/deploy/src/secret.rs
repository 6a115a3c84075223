//! Signing key material.

use std::{fmt, path::PathBuf};

use alloy_signer_local::PrivateKeySigner;

use crate::ConnectionError;

/// Where a signing key is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySource {
    File(PathBuf),
    Env(String),
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::File(path) => write!(f, "key file {}", path.display()),
            KeySource::Env(var) => write!(f, "env var {var}"),
        }
    }
}

impl KeySource {
    /// Read the raw key, trimming surrounding whitespace.
    pub(crate) fn read(&self) -> Result<SigningKey, String> {
        let raw = match self {
            KeySource::File(path) => std::fs::read_to_string(path).map_err(|e| e.to_string())?,
            KeySource::Env(var) => std::env::var(var).map_err(|e| e.to_string())?,
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("key is empty".to_string());
        }
        Ok(SigningKey(trimmed.to_string()))
    }
}

/// A private signing key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parse the key into a local signer.
    pub fn signer(&self) -> Result<PrivateKeySigner, ConnectionError> {
        self.0
            .parse::<PrivateKeySigner>()
            .map_err(|e| ConnectionError::Authentication(format!("invalid signing key: {e}")))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    // First anvil dev account.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_debug_is_redacted() {
        let key = SigningKey::new(DEV_KEY);
        let printed = format!("{key:?}");
        assert!(!printed.contains("ac0974"));
        assert_eq!(printed, "SigningKey(<redacted>)");
    }

    #[test]
    fn test_signer_address() {
        let signer = SigningKey::new(DEV_KEY).signer().unwrap();
        assert_eq!(
            signer.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_invalid_key_is_authentication_error() {
        let err = SigningKey::new("k1").signer().unwrap_err();
        assert!(matches!(err, ConnectionError::Authentication(_)));
    }

    #[test]
    fn test_read_trims_file() {
        let dir = TempDir::new("chainrig-secret").unwrap();
        let path = dir.path().join(".secret");
        std::fs::write(&path, format!("  {DEV_KEY}\n")).unwrap();

        let key = KeySource::File(path).read().unwrap();
        assert_eq!(key, SigningKey::new(DEV_KEY));
    }

    #[test]
    fn test_read_empty_file() {
        let dir = TempDir::new("chainrig-secret").unwrap();
        let path = dir.path().join(".secret");
        std::fs::write(&path, "\n").unwrap();

        assert_eq!(KeySource::File(path).read().unwrap_err(), "key is empty");
    }
}
