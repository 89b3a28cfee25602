//! Blob store — the on-disk home of encrypted frames.
//!
//! # Layout (rooted at `StoreConfig.uploads_dir` / `avatars_dir`)
//!
//! ```text
//! <uploads_dir>/
//!   accounts/<account_id>/
//!     blobs/<storage_key>
//!     previews/<storage_key>
//! <avatars_dir>/
//!   user-<account_id>.<ext>
//! ```
//!
//! # Storage keys
//! `file-<32 hex chars>.<ext>` — 16 random bytes, hex-encoded, plus the
//! lowercased original extension.  The key is content-opaque: it never
//! derives from the file name or bytes, and two identical plaintexts get
//! unrelated keys.  The extension suffix is informational only.
//!
//! # Atomicity
//! Every write goes to a temp file in the destination directory and is
//! renamed into place after a sync, so a failed `put` leaves no artefact
//! and a reader never sees a half-written frame.  The namespace row is
//! only committed after the rename completes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::codec;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Result of a successful [`BlobStore::put`].
#[derive(Debug, Clone)]
pub struct PutReceipt {
    pub storage_key: String,
    /// Plaintext byte length — quota accounting uses this, never the
    /// (padded, possibly compressed) on-disk frame length.
    pub byte_size: u64,
}

pub struct BlobStore {
    uploads_dir: PathBuf,
    avatars_dir: PathBuf,
}

impl BlobStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            uploads_dir: config.uploads_dir.clone(),
            avatars_dir: config.avatars_dir.clone(),
        }
    }

    // ── Key allocation ───────────────────────────────────────────────────

    /// Allocate a fresh content-opaque storage key.
    pub fn allocate_key(extension: &str) -> String {
        let random = hex::encode(Uuid::new_v4().as_bytes());
        if extension.is_empty() {
            format!("file-{random}")
        } else {
            format!("file-{random}.{}", extension.to_ascii_lowercase())
        }
    }

    /// Storage keys are path components; anything else is hostile input.
    fn validate_key(storage_key: &str) -> StoreResult<()> {
        let plain = storage_key.starts_with("file-")
            && !storage_key.contains(['/', '\\'])
            && !storage_key.contains("..");
        if plain {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!(
                "malformed storage key \"{storage_key}\""
            )))
        }
    }

    // ── Paths ────────────────────────────────────────────────────────────

    fn blobs_dir(&self, owner: Uuid) -> PathBuf {
        self.uploads_dir.join("accounts").join(owner.to_string()).join("blobs")
    }

    fn previews_dir(&self, owner: Uuid) -> PathBuf {
        self.uploads_dir.join("accounts").join(owner.to_string()).join("previews")
    }

    // ── Frame I/O ────────────────────────────────────────────────────────

    /// Seal `plaintext` and persist it under a freshly allocated key.
    ///
    /// The temp-then-rename discipline keeps both paths in the same
    /// directory so the rename is atomic; a failure at any step removes
    /// the temp file and reports `IoError` with nothing left on disk.
    pub fn put(
        &self,
        owner: Uuid,
        cipher_key: &[u8],
        plaintext: &[u8],
        extension: &str,
    ) -> StoreResult<PutReceipt> {
        let sealed = codec::seal(plaintext, cipher_key);
        self.put_sealed(owner, &sealed, extension, plaintext.len() as u64)
    }

    /// Persist an already-sealed frame.  Used by ingest when frames are
    /// sealed ahead of the sequential write phase.
    pub fn put_sealed(
        &self,
        owner: Uuid,
        sealed: &[u8],
        extension: &str,
        plaintext_len: u64,
    ) -> StoreResult<PutReceipt> {
        let storage_key = Self::allocate_key(extension);
        write_atomic(&self.blobs_dir(owner).join(&storage_key), sealed)?;
        Ok(PutReceipt { storage_key, byte_size: plaintext_len })
    }

    /// Read and decode the frame stored under `storage_key`.
    pub fn get(&self, owner: Uuid, cipher_key: &[u8], storage_key: &str) -> StoreResult<Vec<u8>> {
        Self::validate_key(storage_key)?;
        let path = self.blobs_dir(owner).join(storage_key);
        let sealed = read_frame(&path, storage_key)?;
        decode_logged(&sealed, cipher_key, storage_key)
    }

    /// Remove the frame and any preview sidecar.  Idempotent: deleting a
    /// key that is already gone succeeds.
    pub fn delete(&self, owner: Uuid, storage_key: &str) -> StoreResult<()> {
        Self::validate_key(storage_key)?;
        remove_if_present(&self.blobs_dir(owner).join(storage_key))?;
        remove_if_present(&self.previews_dir(owner).join(storage_key))?;
        Ok(())
    }

    // ── Previews ─────────────────────────────────────────────────────────

    /// Persist a preview buffer as a sidecar under the same storage key.
    pub fn put_preview(
        &self,
        owner: Uuid,
        cipher_key: &[u8],
        storage_key: &str,
        preview: &[u8],
    ) -> StoreResult<()> {
        Self::validate_key(storage_key)?;
        let sealed = codec::seal(preview, cipher_key);
        write_atomic(&self.previews_dir(owner).join(storage_key), &sealed)
    }

    /// Decoded preview buffer, or `None` when no sidecar was produced at
    /// ingest time.
    pub fn preview(
        &self,
        owner: Uuid,
        cipher_key: &[u8],
        storage_key: &str,
    ) -> StoreResult<Option<Vec<u8>>> {
        Self::validate_key(storage_key)?;
        let path = self.previews_dir(owner).join(storage_key);
        match read_frame(&path, storage_key) {
            Ok(sealed) => decode_logged(&sealed, cipher_key, storage_key).map(Some),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Avatars ──────────────────────────────────────────────────────────
    //
    // Avatars are small public images, stored verbatim — not framed, not
    // encrypted — and replaced atomically.  One avatar per account: a new
    // upload removes any previous file with a different extension.

    pub fn set_avatar(&self, owner: Uuid, extension: &str, bytes: &[u8]) -> StoreResult<PathBuf> {
        let ext = extension.to_ascii_lowercase();
        let path = self.avatars_dir.join(format!("user-{owner}.{ext}"));
        write_atomic(&path, bytes)?;
        // Drop stale avatars left under another extension.
        if let Ok(entries) = fs::read_dir(&self.avatars_dir) {
            let prefix = format!("user-{owner}.");
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&prefix) && entry.path() != path {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(path)
    }

    pub fn avatar(&self, owner: Uuid) -> Option<PathBuf> {
        let prefix = format!("user-{owner}.");
        let entries = fs::read_dir(&self.avatars_dir).ok()?;
        entries
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn read_frame(path: &Path, storage_key: &str) -> StoreResult<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(storage_key.to_owned()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Decode a sealed frame, logging the precise integrity failure internally
/// and surfacing only `CorruptFrame`.
fn decode_logged(sealed: &[u8], cipher_key: &[u8], storage_key: &str) -> StoreResult<Vec<u8>> {
    codec::open(sealed, cipher_key).map_err(|e| {
        log::warn!("frame {storage_key} failed to decode: {e}");
        StoreError::CorruptFrame
    })
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to `path` via a same-directory temp file and atomic rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::InvalidArgument(format!("path {} has no parent", path.display()))
    })?;
    fs::create_dir_all(dir)?;

    let tmp_name = format!(
        "{}.tmp-{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        &hex::encode(Uuid::new_v4().as_bytes())[..8],
    );
    let tmp = dir.join(tmp_name);

    let result = (|| -> StoreResult<()> {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlobStore, Uuid) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::rooted(dir.path());
        let bs = BlobStore::new(&config);
        (dir, bs, Uuid::new_v4())
    }

    const KEY: &[u8] = b"unit-test-key";

    #[test]
    fn put_get_roundtrip() {
        let (_dir, bs, owner) = store();
        let receipt = bs.put(owner, KEY, b"hello", "txt").unwrap();
        assert_eq!(receipt.byte_size, 5);
        assert!(receipt.storage_key.starts_with("file-"));
        assert!(receipt.storage_key.ends_with(".txt"));
        assert_eq!(bs.get(owner, KEY, &receipt.storage_key).unwrap(), b"hello");
    }

    #[test]
    fn identical_plaintexts_get_unrelated_keys() {
        let (_dir, bs, owner) = store();
        let a = bs.put(owner, KEY, b"hello", "txt").unwrap();
        let b = bs.put(owner, KEY, b"hello", "txt").unwrap();
        assert_ne!(a.storage_key, b.storage_key);
        assert_eq!(bs.get(owner, KEY, &a.storage_key).unwrap(), b"hello");
        assert_eq!(bs.get(owner, KEY, &b.storage_key).unwrap(), b"hello");
    }

    #[test]
    fn key_extension_is_lowercased() {
        let key = BlobStore::allocate_key("PNG");
        assert!(key.ends_with(".png"));
        // 5 ("file-") + 32 hex + 4 (".png")
        assert_eq!(key.len(), 41);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, bs, owner) = store();
        let receipt = bs.put(owner, KEY, b"bye", "txt").unwrap();
        bs.delete(owner, &receipt.storage_key).unwrap();
        bs.delete(owner, &receipt.storage_key).unwrap();
        assert!(matches!(
            bs.get(owner, KEY, &receipt.storage_key),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_frame_is_reported_as_corrupt() {
        let (dir, bs, owner) = store();
        let receipt = bs.put(owner, KEY, b"data data data", "txt").unwrap();
        let path = dir
            .path()
            .join("uploads/accounts")
            .join(owner.to_string())
            .join("blobs")
            .join(&receipt.storage_key);
        // Truncate to a non-multiple of 16.
        let mut bytes = fs::read(&path).unwrap();
        bytes.pop();
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            bs.get(owner, KEY, &receipt.storage_key),
            Err(StoreError::CorruptFrame)
        ));
    }

    #[test]
    fn preview_sidecar_roundtrip() {
        let (_dir, bs, owner) = store();
        let receipt = bs.put(owner, KEY, b"full content", "txt").unwrap();
        assert_eq!(bs.preview(owner, KEY, &receipt.storage_key).unwrap(), None);
        bs.put_preview(owner, KEY, &receipt.storage_key, b"full").unwrap();
        assert_eq!(
            bs.preview(owner, KEY, &receipt.storage_key).unwrap().as_deref(),
            Some(&b"full"[..])
        );
        // Deleting the blob removes the sidecar too.
        bs.delete(owner, &receipt.storage_key).unwrap();
        assert_eq!(bs.preview(owner, KEY, &receipt.storage_key).unwrap(), None);
    }

    #[test]
    fn hostile_storage_keys_are_rejected() {
        let (_dir, bs, owner) = store();
        for bad in ["../../etc/passwd", "file-abc/../x", "not-a-key"] {
            assert!(matches!(
                bs.get(owner, KEY, bad),
                Err(StoreError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn avatar_replacement_drops_stale_extension() {
        let (_dir, bs, owner) = store();
        let png = bs.set_avatar(owner, "png", b"png-bytes").unwrap();
        assert_eq!(bs.avatar(owner), Some(png));
        let jpg = bs.set_avatar(owner, "jpg", b"jpg-bytes").unwrap();
        assert_eq!(bs.avatar(owner), Some(jpg.clone()));
        assert_eq!(fs::read(jpg).unwrap(), b"jpg-bytes");
    }
}
