//! No-operation cache provider
//!
//! Backs the `disabled` backend selection: every lookup is a miss and every
//! write is silently discarded, so callers keep working unchanged with
//! caching turned off.

use crate::cache::traits::CacheProvider;
use crate::cache::CacheStats;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A cache provider that never stores anything
pub struct NoopCacheProvider;

impl NoopCacheProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopCacheProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheProvider for NoopCacheProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn get(&self, _text_hash: &str, _model: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    async fn set(&self, _text_hash: &str, _embedding: &[f32], _model: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_batch(
        &self,
        _text_hashes: &[String],
        _model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        Ok(HashMap::new())
    }

    async fn set_batch(&self, entries: &[(String, Vec<f32>)], _model: &str) -> Result<usize> {
        Ok(entries.len())
    }

    async fn delete(&self, _text_hash: &str, _model: &str) -> Result<bool> {
        Ok(false)
    }

    async fn clear(&self) -> Result<u64> {
        Ok(0)
    }

    async fn cleanup(&self, _max_age_days: Option<u32>, _max_entries: Option<u64>) -> Result<u64> {
        Ok(0)
    }

    async fn get_stats(&self) -> CacheStats {
        let mut stats = CacheStats::for_backend(self.name());
        stats.healthy = true;
        stats
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}
