//! Credential stores for the hex-encoded master key.
//!
//! The production store uses the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: Secret Service, with kernel keyutils as a cache in front of it
//! - Windows: Credential Manager
//!
//! `MemoryStore` stands in for it in tests and can be told to fail reads.

use std::sync::Mutex;

use keyring::credential::CredentialPersistence;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::KeyError;

/// A single secret slot.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` only when the store positively reports no entry.
    fn get(&self) -> Result<Option<SecretString>, KeyError>;

    fn set(&self, secret: &SecretString) -> Result<(), KeyError>;

    /// Short label for logs, never the secret.
    fn describe(&self) -> String;

    /// Whether a stored secret outlives a reboot. A key generated into a
    /// store that forgets it would orphan every blob sealed with it.
    fn persistent(&self) -> bool {
        true
    }
}

/// The OS credential store entry `(service, account)`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Unavailable(format!("keychain entry creation: {e}")))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self) -> Result<Option<SecretString>, KeyError> {
        match self.entry()?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyError::Unavailable(format!(
                "keychain get for '{}': {e}",
                self.account
            ))),
        }
    }

    fn set(&self, secret: &SecretString) -> Result<(), KeyError> {
        self.entry()?
            .set_password(secret.expose_secret())
            .map_err(|e| KeyError::Store(format!("keychain store for '{}': {e}", self.account)))?;
        tracing::debug!(service = %self.service, account = %self.account, "stored secret in platform keychain");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("keyring:{}/{}", self.service, self.account)
    }

    fn persistent(&self) -> bool {
        matches!(
            keyring::default::default_credential_builder().persistence(),
            CredentialPersistence::UntilDelete
        )
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: Mutex<Option<String>>,
    read_error: Option<String>,
    volatile: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
            read_error: None,
            volatile: false,
        }
    }

    /// A store whose every read fails, like a locked keychain.
    pub fn locked(reason: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(None),
            read_error: Some(reason.into()),
            volatile: false,
        }
    }

    /// An empty store that reports it loses its contents on reboot.
    pub fn volatile() -> Self {
        Self {
            volatile: true,
            ..Self::default()
        }
    }

    /// Current raw value, for assertions.
    pub fn peek(&self) -> Option<String> {
        self.value.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Result<Option<SecretString>, KeyError> {
        if let Some(reason) = &self.read_error {
            return Err(KeyError::Unavailable(reason.clone()));
        }
        Ok(self.peek().map(SecretString::from))
    }

    fn set(&self, secret: &SecretString) -> Result<(), KeyError> {
        *self.value.lock().unwrap_or_else(|p| p.into_inner()) =
            Some(secret.expose_secret().to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }

    fn persistent(&self) -> bool {
        !self.volatile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get().unwrap().is_none());
        store.set(&SecretString::from("abcd")).unwrap();
        assert_eq!(store.get().unwrap().unwrap().expose_secret(), "abcd");
    }

    #[test]
    fn locked_store_fails_reads() {
        let store = MemoryStore::locked("user denied access");
        assert!(matches!(store.get(), Err(KeyError::Unavailable(_))));
    }

    #[test]
    fn keyring_store_describes_entry() {
        let store = KeyringStore::new("keepsake", "archive-master-key");
        assert_eq!(store.describe(), "keyring:keepsake/archive-master-key");
    }

    #[test]
    fn keyring_store_outlives_reboot() {
        let store = KeyringStore::new("keepsake", "archive-master-key");
        assert!(store.persistent());
    }
}
