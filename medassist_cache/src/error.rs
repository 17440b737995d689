//! Error types for the embedding cache subsystem
//!
//! Backend failures are ordinary values here: every provider returns
//! `Result<T, CacheError>` so the fallback provider can inspect a failure
//! and reroute instead of relying on panics or opaque error chains.

use thiserror::Error;

/// Result type alias for the cache subsystem
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by cache providers and the factory
///
/// A `Backend` error means the underlying store misbehaved (connectivity,
/// locking, timeouts); it is recoverable by routing around the backend.
/// A `Configuration` error is a setup mistake and is only raised at
/// construction time.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The underlying store failed
    #[error("Cache backend '{backend}' failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// Invalid or incomplete configuration at construction time
    #[error("Invalid cache configuration: {message}")]
    Configuration { message: String },

    /// A stored value could not be decoded back into an embedding
    #[error("Corrupt cache entry '{key}': {message}")]
    Corrupt { key: String, message: String },
}

impl CacheError {
    /// Create a backend failure error
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a corrupt-entry error
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the error indicates a failing store rather than a setup mistake
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend("sqlite", err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::backend("redis", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let error = CacheError::backend("redis", "connection refused");
        assert!(error.to_string().contains("redis"));
        assert!(error.to_string().contains("connection refused"));
        assert!(error.is_backend_failure());
    }

    #[test]
    fn test_configuration_error_display() {
        let error = CacheError::configuration("redis backend selected but no URL configured");
        assert!(error.to_string().contains("Invalid cache configuration"));
        assert!(error.to_string().contains("no URL configured"));
        assert!(!error.is_backend_failure());
    }

    #[test]
    fn test_corrupt_error_display() {
        let error = CacheError::corrupt("abc123", "blob length not a multiple of 4");
        assert!(error.to_string().contains("abc123"));
        assert!(error.to_string().contains("multiple of 4"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CacheError>();
        assert_sync::<CacheError>();
    }
}
