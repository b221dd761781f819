//! keepsake-secrets: the archive master key and where it lives
//!
//! Resolution order on first access (then cached for the process lifetime):
//!   1. the in-process cache
//!   2. debug builds only: `KeyManager::with_override_key` or `$KEEPSAKE_MASTER_KEY_HEX`
//!   3. the OS credential store entry (service `keepsake`, account `archive-master-key`)
//!   4. no entry at all: generate 32 random bytes, store them, then cache
//!
//! A store that exists but cannot be read, or holds a malformed value, is an
//! error. The key is never regenerated over an unreadable entry.

pub mod error;
pub mod keychain;
pub mod manager;

pub use error::KeyError;
pub use keychain::{CredentialStore, KeyringStore, MemoryStore};
pub use manager::KeyManager;

/// Env var consulted by debug builds before the credential store
pub const OVERRIDE_ENV: &str = "KEEPSAKE_MASTER_KEY_HEX";
