use crate::config::types::CacheConfig;
use crate::verdict::Verdict;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct CacheEntry {
    verdict: Verdict,
    expires_at: Instant,
    access_count: AtomicU64,
    size: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    bytes: usize,
}

impl Store {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub items: usize,
    pub bytes: usize,
    pub evictions: u64,
}

/// Content-addressed verdict cache with TTL expiry.
///
/// When full, the entry with the fewest accesses is evicted before insert.
pub struct ResultCache {
    store: RwLock<Store>,
    max_items: usize,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            max_items: max_items.max(1),
            max_bytes: max_bytes.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_items, config.max_bytes)
    }

    pub fn get(&self, key: &str) -> Option<Verdict> {
        let now = Instant::now();
        {
            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
            match store.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.verdict.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it lazily
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        if store.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            store.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, verdict: Verdict, ttl: Duration) {
        let key = key.into();
        let size = key.len() + verdict.approx_size();
        let entry = CacheEntry {
            verdict,
            expires_at: Instant::now() + ttl,
            access_count: AtomicU64::new(0),
            size,
        };

        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.remove(&key);

        while !store.entries.is_empty()
            && (store.entries.len() >= self.max_items || store.bytes + size > self.max_bytes)
        {
            let Some(victim) = least_accessed(&store) else {
                break;
            };
            store.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        store.bytes += size;
        store.entries.insert(key, entry);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            store.remove(key);
        }
        expired.len()
    }

    /// Run `sweep_expired` every `interval` until cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.entries.clear();
        store.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            items: store.entries.len(),
            bytes: store.bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn least_accessed(store: &Store) -> Option<String> {
    store
        .entries
        .iter()
        .min_by_key(|(_, e)| e.access_count.load(Ordering::Relaxed))
        .map(|(k, _)| k.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(summary: &str) -> Verdict {
        Verdict::from_ai(false, summary.to_string(), "test".to_string(), Some(0.9))
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.set("k", verdict("v"), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap().summary, "v");
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.set("k", verdict("v"), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_evicts_least_accessed_at_capacity() {
        let cache = ResultCache::new(2, 1 << 20);
        cache.set("a", verdict("a"), Duration::from_secs(60));
        cache.set("b", verdict("b"), Duration::from_secs(60));
        cache.get("a");
        cache.get("a");

        cache.set("c", verdict("c"), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_byte_budget_evicts() {
        let one = "k".len() + verdict("x").approx_size();
        let cache = ResultCache::new(100, one * 2);
        cache.set("k", verdict("x"), Duration::from_secs(60));
        cache.set("j", verdict("x"), Duration::from_secs(60));
        cache.set("m", verdict("x"), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert!(cache.stats().bytes <= one * 2);
    }

    #[test]
    fn test_overwrite_same_key_does_not_evict() {
        let cache = ResultCache::new(1, 1 << 20);
        cache.set("k", verdict("old"), Duration::from_secs(60));
        cache.set("k", verdict("new"), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap().summary, "new");
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_hit_rate() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.set("k", verdict("v"), Duration::from_secs(60));
        cache.get("k");
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.set("short", verdict("s"), Duration::from_millis(10));
        cache.set("long", verdict("l"), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_task_stops_on_cancel() {
        let cache = Arc::new(ResultCache::new(10, 1 << 20));
        cache.set("short", verdict("s"), Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len(), 0);
        cancel.cancel();
        handle.await.unwrap();
    }
}
