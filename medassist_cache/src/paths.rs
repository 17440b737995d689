//! Centralized path management for the embedding cache
//!
//! Provides the default on-disk location for the SQLite cache file so
//! every deployment resolves the same path without repeating the logic.

use std::path::PathBuf;

/// The name of the application data directory used across all platforms
const APP_DATA_DIR: &str = "medassist";

/// The name of the SQLite embedding cache file
const CACHE_DB_FILE: &str = "embedding_cache.db";

/// Returns the base data directory for the application
///
/// On Unix-like systems this follows the XDG Base Directory specification
/// (`~/.local/share/medassist`); on Windows it resolves under `%APPDATA%`.
/// Falls back to `.medassist` in the current directory when the standard
/// directories cannot be determined.
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DATA_DIR))
        .unwrap_or_else(|| PathBuf::from(".medassist"))
}

/// Returns the default path of the SQLite embedding cache database
pub fn get_cache_db_path() -> PathBuf {
    get_data_dir().join(CACHE_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_db_path_is_under_data_dir() {
        let path = get_cache_db_path();
        assert!(path.starts_with(get_data_dir()));
        assert_eq!(path.file_name().unwrap(), CACHE_DB_FILE);
    }
}
