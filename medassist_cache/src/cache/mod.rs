//! Embedding cache providers
//!
//! The cache maps `(text_hash, model)` pairs to embedding vectors so the
//! expensive remote embedding call only runs for texts never seen before.
//! Backends are interchangeable behind the [`CacheProvider`] trait; the
//! fallback provider composes two of them for availability.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod factory;
pub mod fallback_cache;
pub mod memory_cache;
pub mod noop_cache;
pub mod redis_cache;
pub mod service;
pub mod sqlite_cache;
pub mod traits;

pub use factory::CacheFactory;
pub use fallback_cache::FallbackCacheProvider;
pub use memory_cache::MemoryCacheProvider;
pub use noop_cache::NoopCacheProvider;
pub use redis_cache::RedisCacheProvider;
pub use service::{EmbeddingCacheService, EmbeddingGenerator, text_hash};
pub use sqlite_cache::SqliteCacheProvider;
pub use traits::CacheProvider;

use crate::error::{CacheError, Result};

/// One cached embedding
///
/// Identity is the composite key `(text_hash, model)`: the same text hashed
/// for two different models must never collide, because the vectors have
/// different dimensionality and semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 hex digest of the source text
    pub text_hash: String,
    /// Embedding model identifier the vector was produced with
    pub model: String,
    /// The embedding vector; length is model-dependent and opaque here
    pub embedding: Vec<f32>,
    pub created_at: SystemTime,
    /// Advisory access timestamp, refreshed best-effort on reads
    pub last_accessed: SystemTime,
}

impl CacheEntry {
    /// Create a fresh entry with both timestamps set to now
    pub fn new(text_hash: &str, model: &str, embedding: Vec<f32>) -> Self {
        let now = SystemTime::now();
        Self {
            text_hash: text_hash.to_string(),
            model: model.to_string(),
            embedding,
            created_at: now,
            last_accessed: now,
        }
    }
}

/// Point-in-time snapshot of a provider's state
///
/// Hit and miss counters cover the process lifetime only; they are never
/// persisted. `extra_info` is free-form and used by the fallback provider
/// to report routing state.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub backend: String,
    pub entry_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<SystemTime>,
    pub last_cleanup: Option<SystemTime>,
    pub healthy: bool,
    pub extra_info: HashMap<String, String>,
}

impl CacheStats {
    /// Create an empty snapshot for the named backend
    pub fn for_backend(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            ..Self::default()
        }
    }

    /// Fraction of lookups served from the cache, 0.0 when idle
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Serialize an embedding as packed little-endian f32 bytes
///
/// Shared by the SQLite BLOB column and Redis values so both stores hold
/// the same representation.
pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize packed little-endian f32 bytes back into an embedding
pub(crate) fn decode_embedding(key: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(CacheError::corrupt(
            key,
            format!("blob length {} is not a multiple of 4", bytes.len()),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Convert SystemTime to a Unix timestamp in milliseconds
pub(crate) fn system_time_to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Convert a Unix timestamp in milliseconds back to SystemTime
pub(crate) fn millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}
