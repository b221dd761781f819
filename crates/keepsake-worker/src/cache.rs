//! Decrypted session files held by the worker.
//!
//! Keyed by (address, extension). Two triggers evict: more than
//! `max_entries` entries (least recently accessed first), and entries idle
//! longer than `idle_ttl`. Evicting deletes the backing file and queues the
//! address for the host's next `drain-evictions`. The most recently used
//! entry is never evicted by the count trigger, even with a limit of zero,
//! so a just-returned path stays valid.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use keepsake_core::ContentAddress;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub address: ContentAddress,
    pub extension: String,
}

impl CacheKey {
    pub fn new(address: ContentAddress, extension: impl Into<String>) -> Self {
        Self {
            address,
            extension: extension.into(),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    path: PathBuf,
    last_access: Instant,
}

#[derive(Debug)]
pub struct WorkerCache {
    entries: HashMap<CacheKey, CacheEntry>,
    evicted: Vec<ContentAddress>,
    max_entries: usize,
    idle_ttl: Duration,
}

impl WorkerCache {
    pub fn new(max_entries: usize, idle_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            evicted: Vec::new(),
            max_entries,
            idle_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path for `key` if cached and its file still exists; refreshes the
    /// entry's access time.
    pub fn lookup(&mut self, key: &CacheKey, now: Instant) -> Option<PathBuf> {
        self.sweep_idle(now);
        let entry = self.entries.get_mut(key)?;
        if !entry.path.is_file() {
            tracing::debug!(address = %key.address, "cached file vanished; dropping entry");
            self.entries.remove(key);
            return None;
        }
        entry.last_access = now;
        Some(entry.path.clone())
    }

    /// Register (or refresh) `key` → `path`, then enforce both limits.
    pub fn insert(&mut self, key: CacheKey, path: PathBuf, now: Instant) {
        self.sweep_idle(now);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                path,
                last_access: now,
            },
        );
        self.enforce_count(&key);
    }

    /// Evict entries idle longer than `idle_ttl`. Returns how many went.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let ttl = self.idle_ttl;
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_access) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.evict(key, "idle");
        }
        stale.len()
    }

    /// Hand over the queued addresses, deduplicated in first-eviction order.
    pub fn drain_evictions(&mut self) -> Vec<ContentAddress> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for address in self.evicted.drain(..) {
            if seen.insert(address.clone()) {
                out.push(address);
            }
        }
        out
    }

    /// Delete every backing file, forget all entries and pending evictions.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (key, entry) in self.entries.drain() {
            remove_backing_file(&key, &entry.path);
        }
        self.evicted.clear();
        count
    }

    fn enforce_count(&mut self, keep: &CacheKey) {
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|(k, _)| *k != keep)
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => self.evict(&key, "count"),
                None => break,
            }
        }
    }

    fn evict(&mut self, key: &CacheKey, reason: &'static str) {
        if let Some(entry) = self.entries.remove(key) {
            remove_backing_file(key, &entry.path);
            tracing::debug!(address = %key.address, ext = %key.extension, reason, "evicted session file");
            self.evicted.push(key.address.clone());
        }
    }
}

fn remove_backing_file(key: &CacheKey, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(address = %key.address, path = %path.display(), "failed to delete session file: {e}")
        }
    }
}
