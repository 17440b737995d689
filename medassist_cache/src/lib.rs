//! Embedding cache subsystem for the MedAssist dictation backend
//!
//! Generating embeddings for retrieval-augmented lookups means a paid,
//! slow remote API call per text. This crate caches those vectors behind a
//! pluggable [`CacheProvider`] contract with SQLite, Redis, in-memory and
//! no-op backends, plus a [`FallbackCacheProvider`] that pairs two of them
//! and degrades transparently when one goes down. A total cache outage
//! costs recomputation, never a crash: every steady-state operation has a
//! safe empty result, and only misconfiguration at startup errors.
//!
//! ```no_run
//! use medassist_cache::{CacheConfig, CacheFactory};
//!
//! # async fn example() -> medassist_cache::Result<()> {
//! let config = CacheConfig::load()?;
//! let cache = CacheFactory::create(&config).await?;
//!
//! cache.set("a1b2c3", &[0.1, 0.2, 0.3], "text-embedding-3-small").await?;
//! let hit = cache.get("a1b2c3", "text-embedding-3-small").await?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod paths;

pub use cache::{
    CacheEntry, CacheFactory, CacheProvider, CacheStats, EmbeddingCacheService,
    EmbeddingGenerator, FallbackCacheProvider, MemoryCacheProvider, NoopCacheProvider,
    RedisCacheProvider, SqliteCacheProvider, text_hash,
};
pub use cache::factory::{reset_shared, shared};
pub use config::{CacheBackend, CacheConfig};
pub use error::{CacheError, Result};
