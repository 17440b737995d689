//! Cache factory and the process-wide shared provider
//!
//! Resolves a [`CacheConfig`] into a concrete provider graph. Providers are
//! meant to be constructed once at application startup and injected; the
//! shared instance exists for callers that genuinely need one process-wide
//! cache, with an explicit reset for test isolation.

use crate::cache::fallback_cache::FallbackCacheProvider;
use crate::cache::memory_cache::MemoryCacheProvider;
use crate::cache::noop_cache::NoopCacheProvider;
use crate::cache::redis_cache::RedisCacheProvider;
use crate::cache::sqlite_cache::SqliteCacheProvider;
use crate::cache::traits::CacheProvider;
use crate::config::{CacheBackend, CacheConfig};
use crate::error::{CacheError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Factory for creating cache providers from configuration
pub struct CacheFactory;

impl CacheFactory {
    /// Resolve `config` into a concrete provider graph
    ///
    /// `redis` and `fallback` without a URL fail with a configuration
    /// error. A `fallback` or `auto` selection whose Redis construction
    /// fails degrades to SQLite-only instead of wrapping a known-broken
    /// primary.
    pub async fn create(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
        match config.backend {
            CacheBackend::Sqlite => Ok(Arc::new(Self::sqlite_from(config).await?)),

            CacheBackend::Redis => {
                let url = Self::require_redis_url(config)?;
                Ok(Arc::new(Self::redis_from(config, url).await?))
            }

            CacheBackend::Fallback => {
                let url = Self::require_redis_url(config)?;
                match Self::redis_from(config, url).await {
                    Ok(redis) => Ok(Self::wrap_fallback(config, redis).await?),
                    Err(e) => {
                        log::warn!("redis primary unavailable ({e}), using sqlite-only cache");
                        Ok(Arc::new(Self::sqlite_from(config).await?))
                    }
                }
            }

            CacheBackend::Auto => match config.redis_url.as_deref() {
                None => Ok(Arc::new(Self::sqlite_from(config).await?)),
                Some(url) => match Self::redis_from(config, url).await {
                    Err(e) => {
                        log::warn!("redis unavailable ({e}), using sqlite-only cache");
                        Ok(Arc::new(Self::sqlite_from(config).await?))
                    }
                    Ok(redis) => {
                        if config.enable_fallback {
                            Ok(Self::wrap_fallback(config, redis).await?)
                        } else {
                            Ok(Arc::new(redis))
                        }
                    }
                },
            },

            CacheBackend::Disabled => Ok(Arc::new(NoopCacheProvider::new())),
        }
    }

    /// Create a SQLite-only provider at `path` with default limits
    pub async fn sqlite(path: &Path) -> Result<Arc<dyn CacheProvider>> {
        let config = CacheConfig::sqlite(path);
        Ok(Arc::new(Self::sqlite_from(&config).await?))
    }

    /// Create an in-memory provider with default limits
    pub fn memory() -> Arc<dyn CacheProvider> {
        Arc::new(MemoryCacheProvider::default())
    }

    /// Create a no-op provider
    pub fn noop() -> Arc<dyn CacheProvider> {
        Arc::new(NoopCacheProvider::new())
    }

    fn require_redis_url(config: &CacheConfig) -> Result<&str> {
        config.redis_url.as_deref().ok_or_else(|| {
            CacheError::configuration(format!(
                "backend '{}' requires a Redis URL",
                config.backend
            ))
        })
    }

    async fn sqlite_from(config: &CacheConfig) -> Result<SqliteCacheProvider> {
        SqliteCacheProvider::new(&config.sqlite_path, config.max_entries, config.max_age_days)
            .await
    }

    async fn redis_from(config: &CacheConfig, url: &str) -> Result<RedisCacheProvider> {
        RedisCacheProvider::new(
            url,
            &config.redis_prefix,
            config.max_entries,
            config.max_age_days,
        )
        .await
    }

    async fn wrap_fallback(
        config: &CacheConfig,
        redis: RedisCacheProvider,
    ) -> Result<Arc<dyn CacheProvider>> {
        let sqlite = Self::sqlite_from(config).await?;
        Ok(Arc::new(
            FallbackCacheProvider::new(
                Arc::new(redis),
                Arc::new(sqlite),
                Duration::from_secs(config.retry_primary_seconds),
            )
            .await,
        ))
    }
}

/// The one process-wide provider; guarded so concurrent first access
/// constructs exactly once
static SHARED_PROVIDER: Mutex<Option<Arc<dyn CacheProvider>>> = Mutex::const_new(None);

/// Get the shared provider, constructing it from `config` on first access
///
/// Later calls return the existing instance and ignore `config`.
pub async fn shared(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
    let mut guard = SHARED_PROVIDER.lock().await;

    if let Some(provider) = guard.as_ref() {
        return Ok(provider.clone());
    }

    let provider = CacheFactory::create(config).await?;
    *guard = Some(provider.clone());
    Ok(provider)
}

/// Close and drop the shared provider so the next [`shared`] call rebuilds
/// it; primarily for test isolation
pub async fn reset_shared() {
    let mut guard = SHARED_PROVIDER.lock().await;
    if let Some(provider) = guard.take() {
        provider.close().await;
    }
}
