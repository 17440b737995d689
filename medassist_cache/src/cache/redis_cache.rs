//! Redis-backed cache provider
//!
//! Keys live under a configured prefix as `<prefix><model>:<text_hash>` so
//! embeddings from different models never collide and the whole keyspace
//! can be enumerated with a single SCAN pattern. Values are packed f32
//! bytes, expired by Redis itself via per-key TTLs. Suitable for
//! multi-user deployments and as the primary store in fallback mode.

use crate::cache::traits::CacheProvider;
use crate::cache::{CacheStats, decode_embedding, encode_embedding};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Keys deleted per DEL command when clearing or evicting
const DELETE_CHUNK: usize = 500;

/// Keys sampled when estimating the cache's size in bytes
const SIZE_SAMPLE: usize = 100;

/// Redis-backed embedding cache
pub struct RedisCacheProvider {
    conn: ConnectionManager,
    prefix: String,
    ttl_seconds: Option<u64>,
    max_entries: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: Mutex<Option<SystemTime>>,
}

impl RedisCacheProvider {
    /// Connect to Redis at `url`; fails fast on an unreachable server
    pub async fn new(url: &str, prefix: &str, max_entries: u64, max_age_days: u32) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            ttl_seconds: (max_age_days > 0).then(|| u64::from(max_age_days) * 86_400),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_cleanup: Mutex::new(None),
        })
    }

    fn key(&self, text_hash: &str, model: &str) -> String {
        namespaced_key(&self.prefix, text_hash, model)
    }

    /// Enumerate every key under the prefix with SCAN (never KEYS)
    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut removed = 0;

        for chunk in keys.chunks(DELETE_CHUNK) {
            removed += conn.del::<_, u64>(chunk).await?;
        }

        Ok(removed)
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(self.key(text_hash, model)).await?;

        let Some(bytes) = bytes else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match decode_embedding(text_hash, &bytes) {
            Ok(embedding) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(embedding))
            }
            Err(e) => {
                log::warn!("discarding corrupt cache entry: {e}");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(text_hash, model);
        let payload = encode_embedding(embedding);

        match self.ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, payload, ttl).await?,
            None => conn.set::<_, _, ()>(key, payload).await?,
        }

        Ok(true)
    }

    async fn get_batch(
        &self,
        text_hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        if text_hashes.is_empty() {
            return Ok(found);
        }

        let mut conn = self.conn.clone();
        let keys: Vec<String> = text_hashes.iter().map(|h| self.key(h, model)).collect();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        for (text_hash, bytes) in text_hashes.iter().zip(values) {
            let Some(bytes) = bytes else { continue };
            match decode_embedding(text_hash, &bytes) {
                Ok(embedding) => {
                    found.insert(text_hash.clone(), embedding);
                }
                Err(e) => log::warn!("discarding corrupt cache entry: {e}"),
            }
        }

        let hits = found.len() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses
            .fetch_add(text_hashes.len() as u64 - hits, Ordering::Relaxed);

        Ok(found)
    }

    async fn set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        for (text_hash, embedding) in entries {
            let key = self.key(text_hash, model);
            let payload = encode_embedding(embedding);
            match self.ttl_seconds {
                Some(ttl) => pipe.set_ex(key, payload, ttl).ignore(),
                None => pipe.set(key, payload).ignore(),
            };
        }

        pipe.query_async::<()>(&mut conn).await?;

        Ok(entries.len())
    }

    async fn delete(&self, text_hash: &str, model: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.key(text_hash, model)).await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let keys = self.scan_keys().await?;
        self.delete_keys(&keys).await
    }

    async fn cleanup(&self, _max_age_days: Option<u32>, max_entries: Option<u64>) -> Result<u64> {
        // The age policy is enforced by per-key TTLs; only the count policy
        // runs here.
        let entry_cap = max_entries.unwrap_or(self.max_entries);
        let mut removed = 0;

        if entry_cap > 0 {
            let keys = self.scan_keys().await?;
            if keys.len() as u64 > entry_cap {
                // OBJECT IDLETIME approximates least-recently-accessed:
                // the longer idle, the earlier it goes.
                let mut conn = self.conn.clone();
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.cmd("OBJECT").arg("IDLETIME").arg(key);
                }
                let idle_seconds: Vec<i64> = pipe.query_async(&mut conn).await?;

                let mut by_idle: Vec<(&String, i64)> = keys.iter().zip(idle_seconds).collect();
                by_idle.sort_by_key(|(_, idle)| std::cmp::Reverse(*idle));

                let excess = keys.len() - entry_cap as usize;
                let victims: Vec<String> = by_idle
                    .into_iter()
                    .take(excess)
                    .map(|(key, _)| key.clone())
                    .collect();

                removed = self.delete_keys(&victims).await?;
            }
        }

        *self.last_cleanup.lock() = Some(SystemTime::now());

        Ok(removed)
    }

    async fn get_stats(&self) -> CacheStats {
        let mut stats = CacheStats::for_backend(self.name());
        stats.hit_count = self.hits.load(Ordering::Relaxed);
        stats.miss_count = self.misses.load(Ordering::Relaxed);
        stats.last_cleanup = *self.last_cleanup.lock();
        stats.healthy = self.health_check().await;

        match self.scan_keys().await {
            Ok(keys) => {
                stats.entry_count = keys.len() as u64;

                // Extrapolate total size from a bounded sample of STRLENs
                let sample: Vec<&String> = keys.iter().take(SIZE_SAMPLE).collect();
                if !sample.is_empty() {
                    let mut conn = self.conn.clone();
                    let mut pipe = redis::pipe();
                    for key in &sample {
                        pipe.strlen(key);
                    }
                    match pipe.query_async::<Vec<u64>>(&mut conn).await {
                        Ok(lengths) => {
                            let sampled: u64 = lengths.iter().sum();
                            let average = sampled / sample.len() as u64;
                            stats.total_size_bytes = average * stats.entry_count;
                        }
                        Err(e) => log::debug!("failed to sample redis value sizes: {e}"),
                    }
                }
            }
            Err(e) => {
                log::warn!("failed to enumerate redis cache keys: {e}");
                stats.healthy = false;
            }
        }

        stats
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn close(&self) {
        // ConnectionManager owns a multiplexed connection that closes on
        // drop; nothing to release eagerly.
    }
}

/// Build the namespaced key for one `(text_hash, model)` pair
fn namespaced_key(prefix: &str, text_hash: &str, model: &str) -> String {
    format!("{prefix}{model}:{text_hash}")
}
