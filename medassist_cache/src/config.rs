//! Cache configuration resolved from defaults, an optional TOML file and
//! environment variables
//!
//! Configuration is layered: compiled-in defaults, then
//! `medassist-cache.toml` if present, then `MEDASSIST_CACHE_*` environment
//! variables. The resolved [`CacheConfig`] is immutable; the factory reads
//! it once at provider construction.

use crate::error::{CacheError, Result};
use crate::paths;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which cache backend the factory should construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Local SQLite file only
    Sqlite,
    /// Redis only; requires a configured URL
    Redis,
    /// Redis primary with SQLite secondary; requires a configured URL
    Fallback,
    /// Redis (wrapped in fallback when enabled) if a URL is configured,
    /// SQLite otherwise
    #[default]
    Auto,
    /// No caching at all; every lookup is a miss
    Disabled,
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
            Self::Fallback => "fallback",
            Self::Auto => "auto",
            Self::Disabled => "disabled",
        };
        write!(f, "{name}")
    }
}

/// Immutable configuration for the embedding cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend selection; see [`CacheBackend`]
    #[serde(default)]
    pub backend: CacheBackend,

    /// Redis connection URL, e.g. `redis://localhost:6379/0`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for all Redis keys owned by this cache
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,

    /// Path of the SQLite cache database file
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Entry-count ceiling enforced by `cleanup`
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Age ceiling in days enforced by `cleanup` (and Redis TTLs)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Whether `auto` wraps a working Redis in the fallback provider
    #[serde(default = "default_enable_fallback")]
    pub enable_fallback: bool,

    /// How often a failed primary is re-probed, in seconds
    #[serde(default = "default_retry_primary_seconds")]
    pub retry_primary_seconds: u64,
}

fn default_redis_prefix() -> String {
    "medassist:embedding:".to_string()
}

fn default_sqlite_path() -> PathBuf {
    paths::get_cache_db_path()
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_max_age_days() -> u32 {
    30
}

fn default_enable_fallback() -> bool {
    true
}

fn default_retry_primary_seconds() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: None,
            redis_prefix: default_redis_prefix(),
            sqlite_path: default_sqlite_path(),
            max_entries: default_max_entries(),
            max_age_days: default_max_age_days(),
            enable_fallback: default_enable_fallback(),
            retry_primary_seconds: default_retry_primary_seconds(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from defaults, `medassist-cache.toml` and
    /// `MEDASSIST_CACHE_*` environment variables, in that precedence order
    pub fn load() -> Result<Self> {
        let config: CacheConfig = Figment::new()
            .merge(Serialized::defaults(CacheConfig::default()))
            .merge(Toml::file("medassist-cache.toml"))
            .merge(Env::prefixed("MEDASSIST_CACHE_"))
            .extract()
            .map_err(|e| {
                CacheError::configuration(format!("failed to load cache configuration: {e}"))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check that the selected backend has everything it needs
    ///
    /// `redis` and `fallback` both require a Redis URL; anything else is
    /// satisfiable from defaults.
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            CacheBackend::Redis | CacheBackend::Fallback if self.redis_url.is_none() => {
                Err(CacheError::configuration(format!(
                    "backend '{}' requires a Redis URL (set MEDASSIST_CACHE_REDIS_URL)",
                    self.backend
                )))
            }
            _ => Ok(()),
        }
    }

    /// Convenience constructor for a SQLite-only configuration
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: CacheBackend::Sqlite,
            sqlite_path: path.into(),
            ..Self::default()
        }
    }

    /// Convenience constructor for a Redis-primary fallback configuration
    pub fn fallback(redis_url: impl Into<String>, sqlite_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: CacheBackend::Fallback,
            redis_url: Some(redis_url.into()),
            sqlite_path: sqlite_path.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, CacheBackend::Auto);
        assert_eq!(config.redis_prefix, "medassist:embedding:");
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.max_age_days, 30);
        assert!(config.enable_fallback);
        assert_eq!(config.retry_primary_seconds, 60);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_backend_parses_from_lowercase_strings() {
        for (raw, expected) in [
            ("\"sqlite\"", CacheBackend::Sqlite),
            ("\"redis\"", CacheBackend::Redis),
            ("\"fallback\"", CacheBackend::Fallback),
            ("\"auto\"", CacheBackend::Auto),
            ("\"disabled\"", CacheBackend::Disabled),
        ] {
            let parsed: CacheBackend = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn test_backend_rejects_unknown_strings() {
        let parsed: std::result::Result<CacheBackend, _> = serde_json::from_str("\"memcached\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_redis_without_url() {
        let config = CacheConfig {
            backend: CacheBackend::Redis,
            ..CacheConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert!(matches!(error, CacheError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_fallback_without_url() {
        let config = CacheConfig {
            backend: CacheBackend::Fallback,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_auto_without_url() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_fallback_constructor_carries_url() {
        let config = CacheConfig::fallback("redis://localhost:6379", "/tmp/cache.db");
        assert_eq!(config.backend, CacheBackend::Fallback);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert!(config.validate().is_ok());
    }
}
