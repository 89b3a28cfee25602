//! Store configuration — the single record passed into the core.
//!
//! The core holds no process-wide state: every limit and directory root
//! lives here and travels with the [`Store`](crate::store::Store) that was
//! constructed from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration record for a store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on the child count of a single folder, files and
    /// subfolders combined.
    pub max_files_per_folder: usize,
    /// Upper bound on files per ingest batch.
    pub max_files_per_batch: usize,
    /// Upper bound on summed plaintext bytes per ingest batch.
    pub max_bytes_per_batch: u64,
    /// Initial `quota_bytes` for a new account.
    pub default_quota_bytes: u64,
    /// Filesystem root for `accounts/<id>/blobs` and `previews`.
    pub uploads_dir: PathBuf,
    /// Filesystem root for avatar files.
    pub avatars_dir: PathBuf,
    /// Upper bound on avatar file size.
    pub max_avatar_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_files_per_folder: 500,
            max_files_per_batch: 20,
            max_bytes_per_batch: 512 * 1024 * 1024,
            default_quota_bytes: 15 * 1024 * 1024 * 1024,
            uploads_dir: PathBuf::from("uploads"),
            avatars_dir: PathBuf::from("avatars"),
            max_avatar_bytes: 2 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Default configuration with both directory roots placed under `root`.
    pub fn rooted<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            uploads_dir: root.join("uploads"),
            avatars_dir: root.join("avatars"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = StoreConfig::default();
        assert!(c.max_files_per_batch <= c.max_files_per_folder);
        assert!(c.max_bytes_per_batch <= c.default_quota_bytes);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let c = StoreConfig::rooted("/srv/coffre");
        let json = serde_json::to_string(&c).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uploads_dir, PathBuf::from("/srv/coffre/uploads"));
        assert_eq!(back.max_files_per_folder, c.max_files_per_folder);
    }
}
