//! Embedding cache service
//!
//! The seam between the cache and the component that actually produces
//! embeddings. For a batch of texts the service hashes each one, serves
//! whatever the cache already holds, asks the injected generator for the
//! rest, and writes the new vectors back. Cache trouble degrades to
//! recomputation; it never fails the request.

use crate::cache::traits::CacheProvider;
use crate::cache::CacheStats;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Produces embeddings for texts the cache does not hold
///
/// Implementations call the remote embedding API; the service never does.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Return one embedding per input text, in input order
    async fn generate(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>>;
}

/// SHA-256 hex digest of a source text, the cache's half of the key
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Caching wrapper around an [`EmbeddingGenerator`]
pub struct EmbeddingCacheService {
    generator: Arc<dyn EmbeddingGenerator>,
    cache: Arc<dyn CacheProvider>,
}

impl EmbeddingCacheService {
    pub fn new(generator: Arc<dyn EmbeddingGenerator>, cache: Arc<dyn CacheProvider>) -> Self {
        Self { generator, cache }
    }

    /// Embed `texts` with `model`, serving cached vectors where possible
    ///
    /// Results come back in input order. Only texts absent from the cache
    /// reach the generator; new vectors are written back best-effort.
    pub async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let hashes: Vec<String> = texts.iter().map(|text| text_hash(text)).collect();

        let mut cached = match self.cache.get_batch(&hashes, model).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("embedding cache unavailable, recomputing batch: {e}");
                HashMap::new()
            }
        };

        let mut missing_texts = Vec::new();
        let mut missing_hashes = Vec::new();
        for (text, hash) in texts.iter().zip(&hashes) {
            if !cached.contains_key(hash) && !missing_hashes.contains(hash) {
                missing_texts.push(text.clone());
                missing_hashes.push(hash.clone());
            }
        }

        log::debug!(
            "embedding batch: {} cached, {} to generate",
            texts.len() - missing_texts.len(),
            missing_texts.len()
        );

        if !missing_texts.is_empty() {
            let vectors = self.generator.generate(&missing_texts, model).await?;
            if vectors.len() != missing_texts.len() {
                return Err(CacheError::backend(
                    "embedding-generator",
                    format!(
                        "generator returned {} vectors for {} texts",
                        vectors.len(),
                        missing_texts.len()
                    ),
                ));
            }

            let entries: Vec<(String, Vec<f32>)> =
                missing_hashes.into_iter().zip(vectors).collect();

            match self.cache.set_batch(&entries, model).await {
                Ok(written) if written < entries.len() => {
                    log::warn!("cached only {written} of {} new embeddings", entries.len());
                }
                Ok(_) => {}
                Err(e) => log::warn!("failed to cache new embeddings: {e}"),
            }

            cached.extend(entries);
        }

        // Stitch results back into input order
        hashes
            .iter()
            .map(|hash| {
                cached.get(hash).cloned().ok_or_else(|| {
                    CacheError::backend(
                        "embedding-generator",
                        format!("no embedding produced for hash '{hash}'"),
                    )
                })
            })
            .collect()
    }

    /// Statistics of the underlying cache
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats().await
    }

    /// Remove every cached embedding
    pub async fn clear_cache(&self) -> Result<u64> {
        self.cache.clear().await
    }
}
