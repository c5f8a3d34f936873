//! Default on-disk locations

use std::path::PathBuf;

const APP_DIR: &str = "offline-media";

/// Directory holding cached payloads and staged partial transfers.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("payloads")
}

/// SQLite database holding download and access records.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("offline.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_are_namespaced() {
        assert!(default_cache_dir().ends_with("offline-media/payloads"));
        assert!(default_database_path().ends_with("offline-media/offline.db"));
    }
}
