//! Cache provider contract
//!
//! Every backend (and the fallback composite) implements this trait, so the
//! factory can swap implementations without touching caller code.

use crate::cache::CacheStats;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Contract shared by all embedding cache backends
///
/// A missing key is `Ok(None)` (or an omitted map entry), never an error.
/// `Err` means the backend itself failed; standalone callers treat that as
/// a miss, while the fallback provider uses it to reroute.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short stable backend name used in stats and logs
    fn name(&self) -> &'static str;

    /// Point lookup for one `(text_hash, model)` key
    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>>;

    /// Upsert one embedding; returns whether the write landed
    ///
    /// Same-key races resolve last-write-wins at the backend.
    async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool>;

    /// Look up many hashes for one model
    ///
    /// Only found keys appear in the result; callers distinguish "cached"
    /// from "needs computation" by key presence.
    async fn get_batch(
        &self,
        text_hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>>;

    /// Upsert many embeddings; returns how many were written
    ///
    /// Partial success is allowed and reported by count only. Callers treat
    /// a short count as "some work remains" and may retry items singly.
    async fn set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) -> Result<usize>;

    /// Remove one key; returns true if something was removed
    async fn delete(&self, text_hash: &str, model: &str) -> Result<bool>;

    /// Remove every entry; returns the number removed
    async fn clear(&self) -> Result<u64>;

    /// Evict stale and excess entries; returns the number removed
    ///
    /// Two independent policies may both apply: entries whose last access is
    /// older than `max_age_days`, and least-recently-accessed entries beyond
    /// `max_entries`. `None` means use the provider's configured default.
    async fn cleanup(&self, max_age_days: Option<u32>, max_entries: Option<u64>) -> Result<u64>;

    /// Snapshot of counters and backend state; never fails
    async fn get_stats(&self) -> CacheStats;

    /// Lightweight liveness probe; must be fast and must not fail
    async fn health_check(&self) -> bool;

    /// Release held connections; idempotent
    async fn close(&self);
}
