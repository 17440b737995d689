//! SQLite-backed cache provider
//!
//! Persists embeddings to a single local database file. Suitable for
//! single-user deployments and as the secondary store behind Redis.

use crate::cache::traits::CacheProvider;
use crate::cache::{
    CacheStats, decode_embedding, encode_embedding, millis_to_system_time, system_time_to_millis,
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum hashes bound into a single `IN (...)` clause
const BATCH_CHUNK: usize = 500;

/// SQLite-backed embedding cache
pub struct SqliteCacheProvider {
    pool: SqlitePool,
    max_entries: u64,
    max_age_days: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: Mutex<Option<SystemTime>>,
}

impl SqliteCacheProvider {
    /// Open (or create) the cache database at `db_path`
    pub async fn new(db_path: &Path, max_entries: u64, max_age_days: u32) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::backend("sqlite", format!("failed to create cache directory: {e}"))
            })?;
        }

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        Self::initialize_schema(&pool).await?;

        Ok(Self {
            pool,
            max_entries,
            max_age_days,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_cleanup: Mutex::new(None),
        })
    }

    /// Initialize the database schema
    async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
        let schema = r#"
            CREATE TABLE IF NOT EXISTS embedding_cache (
                text_hash TEXT NOT NULL,
                model TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                PRIMARY KEY (text_hash, model)
            );

            CREATE INDEX IF NOT EXISTS idx_embedding_cache_last_accessed
                ON embedding_cache(last_accessed);
        "#;

        sqlx::raw_sql(schema).execute(pool).await?;

        Ok(())
    }

    async fn upsert(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<()> {
        let now_millis = system_time_to_millis(SystemTime::now());

        sqlx::query(
            r#"
            INSERT INTO embedding_cache (text_hash, model, embedding, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(text_hash, model) DO UPDATE SET
                embedding = excluded.embedding,
                created_at = excluded.created_at,
                last_accessed = excluded.last_accessed
            "#,
        )
        .bind(text_hash)
        .bind(model)
        .bind(encode_embedding(embedding))
        .bind(now_millis)
        .bind(now_millis)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refresh the access timestamp for a key; advisory, so errors only log
    async fn touch(&self, text_hash: &str, model: &str) {
        let now_millis = system_time_to_millis(SystemTime::now());
        if let Err(e) = sqlx::query(
            "UPDATE embedding_cache SET last_accessed = ? WHERE text_hash = ? AND model = ?",
        )
        .bind(now_millis)
        .bind(text_hash)
        .bind(model)
        .execute(&self.pool)
        .await
        {
            log::debug!("failed to refresh access time for '{text_hash}': {e}");
        }
    }
}

#[async_trait]
impl CacheProvider for SqliteCacheProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let row =
            sqlx::query("SELECT embedding FROM embedding_cache WHERE text_hash = ? AND model = ?")
                .bind(text_hash)
                .bind(model)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let blob: Vec<u8> = row.try_get("embedding")?;
        match decode_embedding(text_hash, &blob) {
            Ok(embedding) => {
                self.touch(text_hash, model).await;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(embedding))
            }
            Err(e) => {
                // An unreadable row is a miss, not an outage
                log::warn!("discarding corrupt cache entry: {e}");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool> {
        self.upsert(text_hash, embedding, model).await?;
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

        let now_millis = system_time_to_millis(SystemTime::now());
        for chunk in text_hashes.chunks(BATCH_CHUNK) {
            let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                "SELECT text_hash, embedding FROM embedding_cache WHERE model = ",
            );
            query.push_bind(model);
            query.push(" AND text_hash IN (");
            {
                let mut hashes = query.separated(", ");
                for hash in chunk {
                    hashes.push_bind(hash.as_str());
                }
            }
            query.push(")");

            let rows = query.build().fetch_all(&self.pool).await?;
            for row in rows {
                let hash: String = row.try_get("text_hash")?;
                let blob: Vec<u8> = row.try_get("embedding")?;
                match decode_embedding(&hash, &blob) {
                    Ok(embedding) => {
                        found.insert(hash, embedding);
                    }
                    Err(e) => log::warn!("discarding corrupt cache entry: {e}"),
                }
            }

            let mut touch = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                "UPDATE embedding_cache SET last_accessed = ",
            );
            touch.push_bind(now_millis);
            touch.push(" WHERE model = ");
            touch.push_bind(model);
            touch.push(" AND text_hash IN (");
            {
                let mut hashes = touch.separated(", ");
                for hash in chunk {
                    hashes.push_bind(hash.as_str());
                }
            }
            touch.push(")");
            if let Err(e) = touch.build().execute(&self.pool).await {
                log::debug!("failed to refresh batch access times: {e}");
            }
        }

        let hits = found.len() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses
            .fetch_add(text_hashes.len() as u64 - hits, Ordering::Relaxed);

        Ok(found)
    }

    async fn set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
        let mut written = 0;
        let mut last_error = None;

        for (text_hash, embedding) in entries {
            match self.upsert(text_hash, embedding, model).await {
                Ok(()) => written += 1,
                Err(e) => {
                    log::warn!("failed to cache embedding '{text_hash}': {e}");
                    last_error = Some(e);
                }
            }
        }

        // A wholly failed batch is a backend failure, not a short count
        if written == 0
            && !entries.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }

        Ok(written)
    }

    async fn delete(&self, text_hash: &str, model: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM embedding_cache WHERE text_hash = ? AND model = ?")
            .bind(text_hash)
            .bind(model)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embedding_cache")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup(&self, max_age_days: Option<u32>, max_entries: Option<u64>) -> Result<u64> {
        let age_days = max_age_days.unwrap_or(self.max_age_days);
        let entry_cap = max_entries.unwrap_or(self.max_entries);
        let mut removed = 0;

        if age_days > 0 {
            let max_age = Duration::from_secs(u64::from(age_days) * 86_400);
            let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);

            let result = sqlx::query("DELETE FROM embedding_cache WHERE last_accessed < ?")
                .bind(system_time_to_millis(cutoff))
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected();
        }

        if entry_cap > 0 {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
                .fetch_one(&self.pool)
                .await?;

            if count as u64 > entry_cap {
                let excess = count as u64 - entry_cap;
                let result = sqlx::query(
                    r#"
                    DELETE FROM embedding_cache WHERE rowid IN (
                        SELECT rowid FROM embedding_cache
                        ORDER BY last_accessed ASC
                        LIMIT ?
                    )
                    "#,
                )
                .bind(excess as i64)
                .execute(&self.pool)
                .await?;
                removed += result.rows_affected();
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

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS entry_count,
                COALESCE(SUM(LENGTH(embedding)), 0) AS total_bytes,
                MIN(created_at) AS oldest
            FROM embedding_cache
            "#,
        )
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => {
                let entry_count: i64 = row.try_get("entry_count").unwrap_or(0);
                let total_bytes: i64 = row.try_get("total_bytes").unwrap_or(0);
                let oldest: Option<i64> = row.try_get("oldest").unwrap_or(None);

                stats.entry_count = entry_count.max(0) as u64;
                stats.total_size_bytes = total_bytes.max(0) as u64;
                stats.oldest_entry = oldest.map(millis_to_system_time);
                stats.healthy = true;
            }
            Err(e) => {
                log::warn!("failed to read sqlite cache stats: {e}");
                stats.healthy = false;
            }
        }

        stats
    }

    async fn health_check(&self) -> bool {
        let probe: std::result::Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await;
        probe.is_ok()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_cache(dir: &TempDir) -> SqliteCacheProvider {
        SqliteCacheProvider::new(&dir.path().join("cache.db"), 10_000, 30)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        assert!(cache.set("h1", &[0.25, -1.5], "model-a").await.unwrap());
        let embedding = cache.get("h1", "model-a").await.unwrap().unwrap();
        assert_eq!(embedding, vec![0.25, -1.5]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_embedding() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        cache.set("h1", &[1.0], "model-a").await.unwrap();
        cache.set("h1", &[2.0], "model-a").await.unwrap();

        assert_eq!(
            cache.get("h1", "model-a").await.unwrap().unwrap(),
            vec![2.0]
        );

        let stats = cache.get_stats().await;
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_models_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        cache.set("h1", &[1.0], "model-a").await.unwrap();
        assert!(cache.get("h1", "model-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_count_policy_evicts_least_recently_accessed() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        for i in 0..5 {
            cache.set(&format!("h{i}"), &[i as f32], "m").await.unwrap();
        }
        // Touch h0 and h1 so h2..h4 become the eviction candidates
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get("h0", "m").await.unwrap();
        cache.get("h1", "m").await.unwrap();

        let removed = cache.cleanup(None, Some(2)).await.unwrap();
        assert_eq!(removed, 3);

        assert!(cache.get("h0", "m").await.unwrap().is_some());
        assert!(cache.get("h1", "m").await.unwrap().is_some());
        assert!(cache.get("h2", "m").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_report_counts_and_health() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        cache.set("h1", &[1.0, 2.0], "m").await.unwrap();
        cache.get("h1", "m").await.unwrap();
        cache.get("missing", "m").await.unwrap();

        let stats = cache.get_stats().await;
        assert_eq!(stats.backend, "sqlite");
        assert!(stats.healthy);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.total_size_bytes, 8);
        assert!(stats.oldest_entry.is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        cache.close().await;
        cache.close().await;
        assert!(!cache.health_check().await);
    }
}
