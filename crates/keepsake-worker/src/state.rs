use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use keepsake_core::config::{KeepsakeConfig, WorkerConfig};
use keepsake_crypto::MasterKey;
use keepsake_secrets::KeyManager;
use keepsake_store::BlobStore;

use crate::cache::WorkerCache;

/// Everything a handler needs, owned once per worker process and shared by
/// reference with each command.
pub struct WorkerState {
    pub config: WorkerConfig,
    pub store: BlobStore,
    keys: KeyManager,
    cache: Mutex<WorkerCache>,
}

impl WorkerState {
    pub fn new(config: WorkerConfig, store: BlobStore, keys: KeyManager) -> Self {
        let cache = WorkerCache::new(config.max_cached_files, config.idle_ttl());
        Self {
            config,
            store,
            keys,
            cache: Mutex::new(cache),
        }
    }

    pub fn from_config(config: &KeepsakeConfig) -> Self {
        Self::new(
            config.worker.clone(),
            BlobStore::from_config(&config.archive),
            KeyManager::from_config(&config.keychain),
        )
    }

    /// Prepare the archive for a new session: writable dirs exist and no
    /// decrypted file from a previous run survives.
    pub fn start_session(&self) -> std::io::Result<()> {
        self.store.ensure_writable_dirs()?;
        self.store.reset_session_media()
    }

    /// Drop every cached file and wipe the session directory.
    pub fn end_session(&self) {
        let cleared = self.cache().clear();
        if let Err(e) = self.store.reset_session_media() {
            tracing::warn!("session media cleanup failed: {e}");
        }
        tracing::info!(cleared, "session ended");
    }

    pub fn master_key(&self) -> keepsake_core::MediaResult<&MasterKey> {
        Ok(self.keys.master_key()?)
    }

    pub fn cache(&self) -> MutexGuard<'_, WorkerCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn sweep_idle(&self) -> usize {
        let evicted = self.cache().sweep_idle(Instant::now());
        if evicted > 0 {
            tracing::debug!(evicted, "idle sweep");
        }
        evicted
    }
}
