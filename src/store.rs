//! Store facade — the operation surface of the core.
//!
//! One method per RPC-shaped operation, each scoped by the owning account
//! id.  The facade owns the canonical record set (accounts + per-account
//! namespaces) and the blob store, and it is the only place quota deltas
//! are applied — always in the same mutation as the row commit or delete,
//! so no caller can observe a byte total that excludes a committed file or
//! includes a permanently deleted one.
//!
//! # Persistence
//! The record set snapshots to `catalog.json` under the store root via the
//! same temp-then-rename discipline as the blob store.  The catalog is the
//! source of truth; the blob tree is a content-addressed cache keyed by
//! storage key.  Catalog load/save failures surface as
//! `DatabaseUnavailable` — the transient class, never retried here.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Account;
use crate::blob::BlobStore;
use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::ingest::{self, IngestReport, IngestRequest};
use crate::media;
use crate::namespace::{
    FileRecord, FolderListing, FolderRecord, Item, ItemId, Namespace, SearchFilter,
};

#[derive(Serialize, Deserialize)]
struct AccountState {
    account: Account,
    namespace: Namespace,
}

#[derive(Serialize, Deserialize, Default)]
struct Catalog {
    accounts: Vec<AccountState>,
}

pub struct Store {
    config: StoreConfig,
    catalog_path: PathBuf,
    blobs: BlobStore,
    accounts: BTreeMap<Uuid, AccountState>,
}

impl Store {
    // ── Construction ─────────────────────────────────────────────────────

    /// Open (or initialise) a store rooted at `root` with default limits.
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        Self::open_with_config(root, StoreConfig::default())
    }

    /// Open with explicit limits; directory roots are placed under `root`.
    pub fn open_with_config<P: AsRef<Path>>(root: P, config: StoreConfig) -> StoreResult<Self> {
        let root = root.as_ref();
        let config = StoreConfig {
            uploads_dir: root.join("uploads"),
            avatars_dir: root.join("avatars"),
            ..config
        };
        let catalog_path = root.join("catalog.json");
        let blobs = BlobStore::new(&config);

        let mut accounts = BTreeMap::new();
        match fs::read(&catalog_path) {
            Ok(bytes) => {
                let catalog: Catalog = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::DatabaseUnavailable(e.to_string()))?;
                for mut state in catalog.accounts {
                    state.namespace.rebuild_indexes();
                    accounts.insert(state.account.id, state);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::DatabaseUnavailable(e.to_string())),
        }

        Ok(Self { config, catalog_path, blobs, accounts })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Materialise the store root on disk: both directory roots plus an
    /// initial catalog snapshot.  Opening alone reads but writes nothing;
    /// this is the explicit first-write.  Idempotent.
    pub fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.config.uploads_dir)?;
        fs::create_dir_all(&self.config.avatars_dir)?;
        self.persist()
    }

    /// Snapshot the record set.  Called by every mutating operation as its
    /// commit step.
    fn persist(&self) -> StoreResult<()> {
        let catalog = Catalog {
            accounts: self
                .accounts
                .values()
                .map(|s| AccountState {
                    account: s.account.clone(),
                    namespace: s.namespace.clone(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&catalog)
            .map_err(|e| StoreError::DatabaseUnavailable(e.to_string()))?;

        let dir = self.catalog_path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(|e| StoreError::DatabaseUnavailable(e.to_string()))?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        let write = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, &self.catalog_path)
        })();
        write.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::DatabaseUnavailable(e.to_string())
        })
    }

    // ── Account management ───────────────────────────────────────────────

    pub fn create_account(&mut self, name: &str) -> StoreResult<Uuid> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("account name is empty".into()));
        }
        if self.accounts.values().any(|s| s.account.name == name) {
            return Err(StoreError::NameConflict(name.to_owned()));
        }
        let account = Account::new(name, self.config.default_quota_bytes);
        let id = account.id;
        self.accounts
            .insert(id, AccountState { account, namespace: Namespace::new() });
        self.persist()?;
        Ok(id)
    }

    pub fn account(&self, owner: Uuid) -> StoreResult<&Account> {
        self.state(owner).map(|s| &s.account)
    }

    pub fn find_account_by_name(&self, name: &str) -> Option<&Account> {
        self.accounts
            .values()
            .map(|s| &s.account)
            .find(|a| a.name == name)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values().map(|s| &s.account)
    }

    pub fn set_quota(&mut self, owner: Uuid, quota_bytes: u64) -> StoreResult<()> {
        self.state_mut(owner)?.account.quota_bytes = quota_bytes;
        self.persist()
    }

    fn state(&self, owner: Uuid) -> StoreResult<&AccountState> {
        self.accounts
            .get(&owner)
            .ok_or_else(|| StoreError::NotFound(format!("account {owner}")))
    }

    fn state_mut(&mut self, owner: Uuid) -> StoreResult<&mut AccountState> {
        self.accounts
            .get_mut(&owner)
            .ok_or_else(|| StoreError::NotFound(format!("account {owner}")))
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    pub fn upload_batch(
        &mut self,
        owner: Uuid,
        request: IngestRequest,
        cancel: &CancelToken,
    ) -> StoreResult<IngestReport> {
        let config = self.config.clone();
        let blobs = &self.blobs;
        let state = self
            .accounts
            .get_mut(&owner)
            .ok_or_else(|| StoreError::NotFound(format!("account {owner}")))?;
        let report = ingest::ingest(
            &config,
            blobs,
            &mut state.account,
            &mut state.namespace,
            request,
            cancel,
        )?;
        self.persist()?;
        Ok(report)
    }

    // ── Folder operations ────────────────────────────────────────────────

    pub fn create_folder(
        &mut self,
        owner: Uuid,
        parent: Option<ItemId>,
        name: &str,
    ) -> StoreResult<ItemId> {
        self.ensure_child_budget(owner, parent)?;
        let id = self.state_mut(owner)?.namespace.create_folder(parent, name)?;
        self.persist()?;
        Ok(id)
    }

    /// The per-folder child cap applies to every way of adding a child,
    /// not just ingest.
    fn ensure_child_budget(&self, owner: Uuid, parent: Option<ItemId>) -> StoreResult<()> {
        let ns = &self.state(owner)?.namespace;
        if ns.active_child_count(parent) >= self.config.max_files_per_folder {
            let folder = match parent {
                None => "/".to_owned(),
                Some(id) => ns.folder(id).map(|f| f.path.clone()).unwrap_or_default(),
            };
            return Err(StoreError::FolderFileCountExceeded {
                folder,
                limit: self.config.max_files_per_folder,
            });
        }
        Ok(())
    }

    pub fn rename_folder(&mut self, owner: Uuid, id: ItemId, new_name: &str) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.rename_folder(id, new_name)?;
        self.persist()
    }

    pub fn move_folder(
        &mut self,
        owner: Uuid,
        id: ItemId,
        new_parent: Option<ItemId>,
    ) -> StoreResult<()> {
        let current = self.state(owner)?.namespace.folder(id).and_then(|f| {
            if f.is_active() { Some(f.parent_id) } else { None }
        });
        if current != Some(new_parent) {
            self.ensure_child_budget(owner, new_parent)?;
        }
        self.state_mut(owner)?.namespace.move_folder(id, new_parent)?;
        self.persist()
    }

    pub fn soft_delete_folder(&mut self, owner: Uuid, id: ItemId) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.soft_delete_folder(id)?;
        self.persist()
    }

    pub fn restore_folder(&mut self, owner: Uuid, id: ItemId) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.restore_folder(id)?;
        self.persist()
    }

    /// Remove a folder subtree for good: rows first (one atomic unit),
    /// then the frames, then the quota — all in this mutation.
    pub fn permanent_delete_folder(&mut self, owner: Uuid, id: ItemId) -> StoreResult<u64> {
        let state = self.state_mut(owner)?;
        let removed = state.namespace.permanent_delete_folder(id)?;
        let mut freed = 0u64;
        for r in &removed {
            if let Err(e) = self.blobs.delete(owner, &r.storage_key) {
                log::warn!("frame {} outlived its row: {e}", r.storage_key);
            }
            freed += r.size;
        }
        let state = self.state_mut(owner)?;
        state.account.release(freed);
        self.persist()?;
        Ok(freed)
    }

    // ── File operations ──────────────────────────────────────────────────

    pub fn rename_file(&mut self, owner: Uuid, id: ItemId, new_name: &str) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.rename_file(id, new_name)?;
        self.persist()
    }

    pub fn move_file(
        &mut self,
        owner: Uuid,
        id: ItemId,
        new_folder: Option<ItemId>,
    ) -> StoreResult<()> {
        let current = self.state(owner)?.namespace.file(id).and_then(|f| {
            if f.is_active() { Some(f.folder_id) } else { None }
        });
        if current != Some(new_folder) {
            self.ensure_child_budget(owner, new_folder)?;
        }
        self.state_mut(owner)?.namespace.move_file(id, new_folder)?;
        self.persist()
    }

    pub fn soft_delete_file(&mut self, owner: Uuid, id: ItemId) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.soft_delete_file(id)?;
        self.persist()
    }

    pub fn restore_file(&mut self, owner: Uuid, id: ItemId) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.restore_file(id)?;
        self.persist()
    }

    pub fn permanent_delete_file(&mut self, owner: Uuid, id: ItemId) -> StoreResult<u64> {
        let state = self.state_mut(owner)?;
        let removed = state.namespace.permanent_delete_file(id)?;
        if let Err(e) = self.blobs.delete(owner, &removed.storage_key) {
            log::warn!("frame {} outlived its row: {e}", removed.storage_key);
        }
        let state = self.state_mut(owner)?;
        state.account.release(removed.size);
        self.persist()?;
        Ok(removed.size)
    }

    /// Permanent-delete every trashed item.  Cancellable between subtree
    /// roots: items already processed stay deleted (their frames are
    /// gone), items not yet reached stay untouched — always a consistent
    /// state.
    pub fn empty_trash(&mut self, owner: Uuid, cancel: &CancelToken) -> StoreResult<u64> {
        let (folders, files) = self.state(owner)?.namespace.list_trash();
        let mut freed = 0u64;

        for folder in folders {
            if cancel.is_cancelled() {
                let _ = self.persist();
                return Err(StoreError::Cancelled);
            }
            freed += self.purge_folder(owner, folder.id)?;
        }
        for file in files {
            if cancel.is_cancelled() {
                let _ = self.persist();
                return Err(StoreError::Cancelled);
            }
            let state = self.state_mut(owner)?;
            let removed = state.namespace.permanent_delete_file(file.id)?;
            if let Err(e) = self.blobs.delete(owner, &removed.storage_key) {
                log::warn!("frame {} outlived its row: {e}", removed.storage_key);
            }
            self.state_mut(owner)?.account.release(removed.size);
            freed += removed.size;
        }
        self.persist()?;
        Ok(freed)
    }

    fn purge_folder(&mut self, owner: Uuid, id: ItemId) -> StoreResult<u64> {
        let state = self.state_mut(owner)?;
        let removed = state.namespace.permanent_delete_folder(id)?;
        let mut freed = 0u64;
        for r in &removed {
            if let Err(e) = self.blobs.delete(owner, &r.storage_key) {
                log::warn!("frame {} outlived its row: {e}", r.storage_key);
            }
            freed += r.size;
        }
        self.state_mut(owner)?.account.release(freed);
        Ok(freed)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Full plaintext of an active file.
    pub fn download_file(&self, owner: Uuid, id: ItemId) -> StoreResult<Vec<u8>> {
        let state = self.state(owner)?;
        let file = active_file(&state.namespace, id)?;
        self.blobs
            .get(owner, &state.account.cipher_key, &file.storage_key)
    }

    /// Plaintext for viewing.  When `prefer_preview` is set and a preview
    /// sidecar exists, the (smaller) preview buffer is returned instead of
    /// the full content.
    pub fn view_file(&self, owner: Uuid, id: ItemId, prefer_preview: bool) -> StoreResult<Vec<u8>> {
        let state = self.state(owner)?;
        let file = active_file(&state.namespace, id)?;
        if prefer_preview && file.has_preview {
            if let Some(preview) = self.blobs.preview(
                owner,
                &state.account.cipher_key,
                &file.storage_key,
            )? {
                return Ok(preview);
            }
        }
        self.blobs
            .get(owner, &state.account.cipher_key, &file.storage_key)
    }

    pub fn list_contents(&self, owner: Uuid, parent: Option<ItemId>) -> StoreResult<FolderListing> {
        self.state(owner)?.namespace.list_contents(parent, false)
    }

    pub fn list_trash(&self, owner: Uuid) -> StoreResult<(Vec<FolderRecord>, Vec<FileRecord>)> {
        Ok(self.state(owner)?.namespace.list_trash())
    }

    pub fn list_pinned(&self, owner: Uuid, offset: usize, limit: usize) -> StoreResult<Vec<Item>> {
        Ok(self.state(owner)?.namespace.list_pinned(offset, limit))
    }

    pub fn list_recent(&self, owner: Uuid, limit: usize) -> StoreResult<Vec<FileRecord>> {
        Ok(self.state(owner)?.namespace.list_recent(limit))
    }

    pub fn search(&self, owner: Uuid, query: &str, filter: &SearchFilter) -> StoreResult<Vec<Item>> {
        Ok(self.state(owner)?.namespace.search(query, filter))
    }

    pub fn resolve_path(&self, owner: Uuid, path: &str) -> StoreResult<Option<Item>> {
        Ok(self.state(owner)?.namespace.resolve_path(path))
    }

    pub fn folder(&self, owner: Uuid, id: ItemId) -> StoreResult<Option<FolderRecord>> {
        Ok(self.state(owner)?.namespace.folder(id).cloned())
    }

    pub fn file(&self, owner: Uuid, id: ItemId) -> StoreResult<Option<FileRecord>> {
        Ok(self.state(owner)?.namespace.file(id).cloned())
    }

    // ── Properties ───────────────────────────────────────────────────────

    pub fn set_file_pinned(&mut self, owner: Uuid, id: ItemId, pinned: bool) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.set_file_pinned(id, pinned)?;
        self.persist()
    }

    pub fn set_folder_pinned(&mut self, owner: Uuid, id: ItemId, pinned: bool) -> StoreResult<()> {
        self.state_mut(owner)?.namespace.set_folder_pinned(id, pinned)?;
        self.persist()
    }

    // ── Avatars ──────────────────────────────────────────────────────────

    pub fn set_avatar(&mut self, owner: Uuid, extension: &str, bytes: &[u8]) -> StoreResult<PathBuf> {
        self.state(owner)?;
        if !media::is_avatar_extension(extension) {
            return Err(StoreError::UnsupportedMediaType(extension.to_owned()));
        }
        if bytes.len() as u64 > self.config.max_avatar_bytes {
            return Err(StoreError::InvalidArgument(format!(
                "avatar is {} B, limit is {} B",
                bytes.len(),
                self.config.max_avatar_bytes
            )));
        }
        self.blobs.set_avatar(owner, extension, bytes)
    }

    pub fn avatar(&self, owner: Uuid) -> StoreResult<Option<PathBuf>> {
        self.state(owner)?;
        Ok(self.blobs.avatar(owner))
    }
}

fn active_file(ns: &Namespace, id: ItemId) -> StoreResult<FileRecord> {
    ns.file(id)
        .filter(|f| f.is_active())
        .cloned()
        .ok_or_else(|| StoreError::NotFound(format!("file {id}")))
}
