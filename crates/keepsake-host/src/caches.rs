//! Host-side response caches.
//!
//! Three tiers, each a bounded LRU behind its own lock:
//!
//! - inline: data URLs keyed by (address, mime), bounded by entry count
//! - paths: decrypted session file paths keyed by (address, mime), bounded by
//!   entry count
//! - thumbnails: thumbnail data URLs keyed by (address, max dimension),
//!   bounded by total data-URL length
//!
//! Every tier keeps at least its most recent entry even when that entry alone
//! exceeds the budget.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use keepsake_core::config::HostConfig;
use keepsake_core::ContentAddress;

struct Slot<V> {
    value: V,
    tick: u64,
    weight: u64,
}

/// Least-recently-used map with a weight budget. Recency is a monotonic
/// tick; `order` maps ticks back to keys so the oldest entry is found
/// without a scan.
pub struct LruCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    budget: u64,
    weight: u64,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(budget: u64) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            budget,
            weight: 0,
            tick: 0,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        Some(slot.value.clone())
    }

    /// Insert with unit weight.
    pub fn put(&mut self, key: K, value: V) -> usize {
        self.put_weighted(key, value, 1)
    }

    /// Insert or replace, then evict least-recently-used entries until the
    /// budget holds. Returns how many entries were evicted.
    pub fn put_weighted(&mut self, key: K, value: V, weight: u64) -> usize {
        self.remove(&key);
        let tick = self.next_tick();
        self.order.insert(tick, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                tick,
                weight,
            },
        );
        self.weight += weight;

        let mut evicted = 0;
        while self.weight > self.budget && self.entries.len() > 1 {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&oldest) {
                self.weight -= slot.weight;
                evicted += 1;
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        self.weight -= slot.weight;
        Some(slot.value)
    }

    /// Remove every entry whose key matches.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.weight = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// (address, mime) for the inline and path tiers.
pub type MediaKey = (ContentAddress, String);
/// (address, max dimension) for the thumbnail tier.
pub type ThumbKey = (ContentAddress, u32);

pub struct HostCaches {
    inline: Mutex<LruCache<MediaKey, String>>,
    paths: Mutex<LruCache<MediaKey, PathBuf>>,
    thumbnails: Mutex<LruCache<ThumbKey, String>>,
}

impl HostCaches {
    pub fn new(inline_entries: usize, path_entries: usize, thumbnail_bytes: u64) -> Self {
        Self {
            inline: Mutex::new(LruCache::new(inline_entries as u64)),
            paths: Mutex::new(LruCache::new(path_entries as u64)),
            thumbnails: Mutex::new(LruCache::new(thumbnail_bytes)),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(
            config.inline_cache_entries,
            config.path_cache_entries,
            config.thumbnail_cache_bytes,
        )
    }

    pub fn inline(&self, address: &ContentAddress, mime: &str) -> Option<String> {
        lock(&self.inline).get(&(address.clone(), mime.to_string()))
    }

    pub fn put_inline(&self, address: &ContentAddress, mime: &str, data_url: String) {
        lock(&self.inline).put((address.clone(), mime.to_string()), data_url);
    }

    /// A cached session path, provided the file is still on disk.
    pub fn path(&self, address: &ContentAddress, mime: &str) -> Option<PathBuf> {
        let key = (address.clone(), mime.to_string());
        let mut paths = lock(&self.paths);
        let path = paths.get(&key)?;
        if path.is_file() {
            Some(path)
        } else {
            paths.remove(&key);
            None
        }
    }

    pub fn put_path(&self, address: &ContentAddress, mime: &str, path: PathBuf) {
        lock(&self.paths).put((address.clone(), mime.to_string()), path);
    }

    pub fn thumbnail(&self, address: &ContentAddress, max_dimension: u32) -> Option<String> {
        lock(&self.thumbnails).get(&(address.clone(), max_dimension))
    }

    pub fn put_thumbnail(&self, address: &ContentAddress, max_dimension: u32, data_url: String) {
        let weight = data_url.len() as u64;
        let evicted =
            lock(&self.thumbnails).put_weighted((address.clone(), max_dimension), data_url, weight);
        if evicted > 0 {
            tracing::trace!(evicted, "thumbnail tier over budget");
        }
    }

    /// Forget everything cached for `address` in every tier.
    pub fn purge_address(&self, address: &ContentAddress) -> usize {
        lock(&self.inline).remove_where(|(a, _)| a == address)
            + lock(&self.paths).remove_where(|(a, _)| a == address)
            + lock(&self.thumbnails).remove_where(|(a, _)| a == address)
    }

    /// Session paths die with the worker that wrote them.
    pub fn clear_paths(&self) {
        lock(&self.paths).clear();
    }

    pub fn clear(&self) {
        lock(&self.inline).clear();
        lock(&self.paths).clear();
        lock(&self.thumbnails).clear();
    }

    /// Entry counts as (inline, paths, thumbnails).
    pub fn lens(&self) -> (usize, usize, usize) {
        (
            lock(&self.inline).len(),
            lock(&self.paths).len(),
            lock(&self.thumbnails).len(),
        )
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> ContentAddress {
        ContentAddress::from_digest(&[n; 32])
    }

    #[test]
    fn lru_evicts_least_recent() {
        let mut lru = LruCache::new(2);
        lru.put("a", 1);
        lru.put("b", 2);
        assert_eq!(lru.get(&"a"), Some(1));
        assert_eq!(lru.put("c", 3), 1);

        assert_eq!(lru.get(&"b"), None);
        assert_eq!(lru.get(&"a"), Some(1));
        assert_eq!(lru.get(&"c"), Some(3));
    }

    #[test]
    fn replace_does_not_double_count() {
        let mut lru = LruCache::new(10);
        lru.put_weighted("a", "x", 4);
        lru.put_weighted("a", "y", 6);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.weight(), 6);
        assert_eq!(lru.get(&"a"), Some("y"));
    }

    #[test]
    fn oversized_entry_is_kept_alone() {
        let mut lru = LruCache::new(10);
        lru.put_weighted("small", 1, 3);
        let evicted = lru.put_weighted("huge", 2, 50);
        assert_eq!(evicted, 1);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.get(&"huge"), Some(2));
    }

    #[test]
    fn zero_budget_still_holds_latest() {
        let mut lru = LruCache::new(0);
        lru.put("a", 1);
        lru.put("b", 2);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.get(&"b"), Some(2));
    }

    #[test]
    fn thumbnail_tier_is_byte_bounded() {
        let caches = HostCaches::new(8, 8, 100);
        caches.put_thumbnail(&addr(1), 256, "x".repeat(40));
        caches.put_thumbnail(&addr(2), 256, "y".repeat(40));
        caches.put_thumbnail(&addr(3), 256, "z".repeat(40));

        assert!(caches.thumbnail(&addr(1), 256).is_none());
        assert!(caches.thumbnail(&addr(2), 256).is_some());
        assert!(caches.thumbnail(&addr(3), 256).is_some());
        assert!(caches.thumbnail(&addr(3), 128).is_none());
    }

    #[test]
    fn purge_address_hits_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"clip").unwrap();

        let caches = HostCaches::new(8, 8, 1024);
        caches.put_inline(&addr(1), "image/png", "data:a".into());
        caches.put_inline(&addr(1), "image/webp", "data:b".into());
        caches.put_path(&addr(1), "video/mp4", file.clone());
        caches.put_thumbnail(&addr(1), 256, "data:t".into());
        caches.put_inline(&addr(2), "image/png", "data:c".into());

        assert_eq!(caches.purge_address(&addr(1)), 4);
        assert_eq!(caches.lens(), (1, 0, 0));
        assert_eq!(caches.inline(&addr(2), "image/png").as_deref(), Some("data:c"));
    }

    #[test]
    fn stale_path_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"clip").unwrap();

        let caches = HostCaches::new(8, 8, 1024);
        caches.put_path(&addr(1), "video/mp4", file.clone());
        assert_eq!(caches.path(&addr(1), "video/mp4"), Some(file.clone()));

        std::fs::remove_file(&file).unwrap();
        assert_eq!(caches.path(&addr(1), "video/mp4"), None);
        assert_eq!(caches.lens().1, 0);
    }
}
