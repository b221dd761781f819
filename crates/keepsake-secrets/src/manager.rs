use std::sync::{Mutex, OnceLock};

use keepsake_core::config::KeychainConfig;
use keepsake_crypto::MasterKey;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::keychain::{CredentialStore, KeyringStore};

/// Owns the process-wide master key.
///
/// The key is resolved once and then kept in memory until the process
/// exits; there is no relock.
pub struct KeyManager {
    store: Box<dyn CredentialStore>,
    cached: OnceLock<MasterKey>,
    init: Mutex<()>,
    #[cfg(debug_assertions)]
    override_key: Option<MasterKey>,
}

impl KeyManager {
    pub fn new(store: impl CredentialStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cached: OnceLock::new(),
            init: Mutex::new(()),
            #[cfg(debug_assertions)]
            override_key: None,
        }
    }

    pub fn from_config(config: &KeychainConfig) -> Self {
        Self::new(KeyringStore::new(&config.service, &config.account))
    }

    /// Use `key` instead of the credential store. Debug builds only.
    #[cfg(debug_assertions)]
    pub fn with_override_key(mut self, key: MasterKey) -> Self {
        self.override_key = Some(key);
        self
    }

    /// The master key, resolving it on first call.
    pub fn master_key(&self) -> Result<&MasterKey, KeyError> {
        if let Some(key) = self.cached.get() {
            return Ok(key);
        }
        // Serialise first resolution so two callers never both generate.
        let _guard = self.init.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(key) = self.cached.get() {
            return Ok(key);
        }
        let key = self.resolve()?;
        Ok(self.cached.get_or_init(|| key))
    }

    pub fn is_cached(&self) -> bool {
        self.cached.get().is_some()
    }

    fn resolve(&self) -> Result<MasterKey, KeyError> {
        #[cfg(debug_assertions)]
        {
            if let Some(key) = &self.override_key {
                tracing::warn!("using override master key (debug build)");
                return Ok(key.clone());
            }
            if let Ok(raw) = std::env::var(crate::OVERRIDE_ENV) {
                tracing::warn!(var = crate::OVERRIDE_ENV, "using master key from environment (debug build)");
                return parse_hex_key(&SecretString::from(raw));
            }
        }

        let source = self.store.describe();
        match self.store.get()? {
            Some(secret) => {
                tracing::debug!(store = %source, "master key loaded");
                parse_hex_key(&secret)
            }
            None if !self.store.persistent() => Err(KeyError::Unavailable(format!(
                "{source} has no master key and would not keep a new one across reboots"
            ))),
            None => {
                let key = MasterKey::generate();
                let encoded = SecretString::from(hex::encode(key.as_bytes()));
                self.store.set(&encoded)?;
                tracing::info!(store = %source, "generated new archive master key");
                Ok(key)
            }
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("store", &self.store.describe())
            .field("cached", &self.is_cached())
            .finish()
    }
}

/// Decode a 64-char hex key.
pub fn parse_hex_key(secret: &SecretString) -> Result<MasterKey, KeyError> {
    let bytes = Zeroizing::new(
        hex::decode(secret.expose_secret().trim())
            .map_err(|e| KeyError::Malformed(format!("not hex: {e}")))?,
    );
    MasterKey::from_slice(&bytes).ok_or_else(|| {
        KeyError::Malformed(format!("expected 32 bytes, got {}", bytes.len()))
    })
}
