//! In-memory cache provider
//!
//! Process-local store with inline LRU eviction. Useful for tests and for
//! deployments where embeddings are cheap enough that persistence is not
//! worth a database file.

use crate::cache::traits::CacheProvider;
use crate::cache::{CacheEntry, CacheStats};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

type Key = (String, String);

/// In-memory embedding cache
pub struct MemoryCacheProvider {
    entries: RwLock<HashMap<Key, CacheEntry>>,
    max_entries: u64,
    max_age_days: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: parking_lot::Mutex<Option<SystemTime>>,
}

impl MemoryCacheProvider {
    pub fn new(max_entries: u64, max_age_days: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            max_age_days,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_cleanup: parking_lot::Mutex::new(None),
        }
    }

    fn key(text_hash: &str, model: &str) -> Key {
        (text_hash.to_string(), model.to_string())
    }

    /// Evict least-recently-accessed entries until at most `cap` remain
    fn evict_to_cap(entries: &mut HashMap<Key, CacheEntry>, cap: u64) -> u64 {
        let mut removed = 0;
        while entries.len() as u64 > cap {
            let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest_key);
            removed += 1;
        }
        removed
    }
}

impl Default for MemoryCacheProvider {
    fn default() -> Self {
        Self::new(10_000, 30)
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(&Self::key(text_hash, model)) {
            entry.last_accessed = SystemTime::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(entry.embedding.clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;

        entries.insert(
            Self::key(text_hash, model),
            CacheEntry::new(text_hash, model, embedding.to_vec()),
        );
        if self.max_entries > 0 {
            Self::evict_to_cap(&mut entries, self.max_entries);
        }

        Ok(true)
    }

    async fn get_batch(
        &self,
        text_hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut entries = self.entries.write().await;
        let mut found = HashMap::new();
        let now = SystemTime::now();

        for text_hash in text_hashes {
            if let Some(entry) = entries.get_mut(&Self::key(text_hash, model)) {
                entry.last_accessed = now;
                found.insert(text_hash.clone(), entry.embedding.clone());
            }
        }

        let hits = found.len() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses
            .fetch_add(text_hashes.len() as u64 - hits, Ordering::Relaxed);

        Ok(found)
    }

    async fn set_batch(&self, batch: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;

        for (text_hash, embedding) in batch {
            entries.insert(
                Self::key(text_hash, model),
                CacheEntry::new(text_hash, model, embedding.clone()),
            );
        }
        if self.max_entries > 0 {
            Self::evict_to_cap(&mut entries, self.max_entries);
        }

        Ok(batch.len())
    }

    async fn delete(&self, text_hash: &str, model: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&Self::key(text_hash, model)).is_some())
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn cleanup(&self, max_age_days: Option<u32>, max_entries: Option<u64>) -> Result<u64> {
        let age_days = max_age_days.unwrap_or(self.max_age_days);
        let entry_cap = max_entries.unwrap_or(self.max_entries);

        let mut entries = self.entries.write().await;
        let mut removed = 0;

        if age_days > 0 {
            let max_age = Duration::from_secs(u64::from(age_days) * 86_400);
            let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);
            let before = entries.len();
            entries.retain(|_, entry| entry.last_accessed >= cutoff);
            removed += (before - entries.len()) as u64;
        }

        if entry_cap > 0 {
            removed += Self::evict_to_cap(&mut entries, entry_cap);
        }

        *self.last_cleanup.lock() = Some(SystemTime::now());

        Ok(removed)
    }

    async fn get_stats(&self) -> CacheStats {
        let entries = self.entries.read().await;

        let mut stats = CacheStats::for_backend(self.name());
        stats.entry_count = entries.len() as u64;
        stats.hit_count = self.hits.load(Ordering::Relaxed);
        stats.miss_count = self.misses.load(Ordering::Relaxed);
        stats.total_size_bytes = entries
            .values()
            .map(|entry| (entry.embedding.len() * 4 + entry.text_hash.len() + entry.model.len()) as u64)
            .sum();
        stats.oldest_entry = entries.values().map(|entry| entry.created_at).min();
        stats.last_cleanup = *self.last_cleanup.lock();
        stats.healthy = true;

        stats
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {
        // Nothing held beyond process memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCacheProvider::default();

        cache.set("h1", &[1.0, 2.0], "m").await.unwrap();
        assert_eq!(
            cache.get("h1", "m").await.unwrap().unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[tokio::test]
    async fn test_set_evicts_lru_beyond_cap() {
        let cache = MemoryCacheProvider::new(2, 30);

        cache.set("h1", &[1.0], "m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("h2", &[2.0], "m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        // Touch h1 so h2 is now the least recently accessed
        cache.get("h1", "m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("h3", &[3.0], "m").await.unwrap();

        assert!(cache.get("h1", "m").await.unwrap().is_some());
        assert!(cache.get("h2", "m").await.unwrap().is_none());
        assert!(cache.get("h3", "m").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = MemoryCacheProvider::default();

        cache.set("h1", &[1.0], "m").await.unwrap();
        assert!(cache.delete("h1", "m").await.unwrap());
        assert!(!cache.delete("h1", "m").await.unwrap());
        assert!(!cache.delete("never-set", "m").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_reports_count() {
        let cache = MemoryCacheProvider::default();

        cache.set("h1", &[1.0], "m").await.unwrap();
        cache.set("h2", &[2.0], "m").await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.get_stats().await.entry_count, 0);
    }
}
