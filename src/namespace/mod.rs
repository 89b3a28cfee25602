//! Namespace engine — the logical file tree of one account.
//!
//! # Record set
//! Folders and files live in id-keyed arenas; parentage is by id only and
//! traversal goes through lookups, never owning pointers.  Ids are stable
//! and never reused.  The `path`/`path_segments` denormalisation is
//! maintained here and nowhere else.
//!
//! # Uniqueness
//! Active siblings are unique per parent — `(parent, name)` for folders,
//! `(parent, name, extension)` for files — enforced by explicit sibling
//! indexes (the in-process stand-in for a database unique index).  Trashed
//! records keep their identity but leave the indexes, so a fresh item may
//! take the name and a later restore of the old one fails with
//! `NameConflict`.
//!
//! # Bulk rewrites
//! Rename and move rewrite every descendant's path and the matching
//! `path_segments` entry as one atomic unit: all new values are computed
//! and validated first, then applied; no fallible step runs mid-apply, so
//! a partial rewrite cannot be observed.
//!
//! # Storage
//! The engine never touches the disk.  Permanent deletion returns the
//! removed files' storage keys and sizes; the caller drives the blob store
//! and the quota with them.

pub mod record;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::media::MediaCategory;
pub use record::{
    FileRecord, FolderListing, FolderRecord, Item, ItemId, ItemKind, PathSegment, RemovedFile,
    SearchFilter,
};

/// Maximum length of a single folder or file name.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Namespace {
    folders: BTreeMap<ItemId, FolderRecord>,
    files: BTreeMap<ItemId, FileRecord>,
    next_id: ItemId,

    // Sibling-name indexes over ACTIVE records only.  Rebuilt after
    // deserialization; see `rebuild_indexes`.
    #[serde(skip)]
    folder_names: HashMap<(Option<ItemId>, String), ItemId>,
    #[serde(skip)]
    file_names: HashMap<(Option<ItemId>, String, String), ItemId>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the sibling indexes from the record set.  Must be called
    /// after loading a serialized namespace.
    pub fn rebuild_indexes(&mut self) {
        self.folder_names.clear();
        self.file_names.clear();
        for f in self.folders.values().filter(|f| f.is_active()) {
            self.folder_names.insert((f.parent_id, f.name.clone()), f.id);
        }
        for f in self.files.values().filter(|f| f.is_active()) {
            self.file_names
                .insert((f.folder_id, f.name.clone(), f.extension.clone()), f.id);
        }
    }

    fn alloc(&mut self) -> ItemId {
        self.next_id += 1;
        self.next_id
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn folder(&self, id: ItemId) -> Option<&FolderRecord> {
        self.folders.get(&id)
    }

    pub fn file(&self, id: ItemId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    /// Active file with this exact `(name, extension)` under `folder`.
    pub fn find_active_file(
        &self,
        folder: Option<ItemId>,
        name: &str,
        extension: &str,
    ) -> Option<ItemId> {
        self.file_names
            .get(&(folder, name.to_owned(), extension.to_ascii_lowercase()))
            .copied()
    }

    /// Active immediate children of `parent`, files and subfolders combined.
    pub fn active_child_count(&self, parent: Option<ItemId>) -> usize {
        let folders = self
            .folders
            .values()
            .filter(|f| f.is_active() && f.parent_id == parent)
            .count();
        let files = self
            .files
            .values()
            .filter(|f| f.is_active() && f.folder_id == parent)
            .count();
        folders + files
    }

    /// Sum of `size` over every file row, trashed included — the quota
    /// counterpart (trash stays billable until permanent deletion).
    pub fn total_billable_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    // ── Validation helpers ───────────────────────────────────────────────

    fn validate_name(name: &str) -> StoreResult<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "name must be 1..={MAX_NAME_LEN} bytes"
            )));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::InvalidArgument(format!("illegal name \"{name}\"")));
        }
        Ok(())
    }

    /// Path and segment chain of a prospective parent; the root is the
    /// empty chain.  Fails with `NotFound` for a missing or trashed parent.
    fn parent_chain(&self, parent: Option<ItemId>) -> StoreResult<(String, Vec<PathSegment>)> {
        match parent {
            None => Ok((String::new(), Vec::new())),
            Some(id) => {
                let f = self
                    .folders
                    .get(&id)
                    .filter(|f| f.is_active())
                    .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))?;
                Ok((f.path.clone(), f.path_segments.clone()))
            }
        }
    }

    fn active_folder(&self, id: ItemId) -> StoreResult<&FolderRecord> {
        self.folders
            .get(&id)
            .filter(|f| f.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))
    }

    fn active_file(&self, id: ItemId) -> StoreResult<&FileRecord> {
        self.files
            .get(&id)
            .filter(|f| f.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("file {id}")))
    }

    // ── Create ───────────────────────────────────────────────────────────

    /// Create a folder under `parent_id` (`None` = account root).
    pub fn create_folder(&mut self, parent_id: Option<ItemId>, name: &str) -> StoreResult<ItemId> {
        Self::validate_name(name)?;
        let (parent_path, parent_segments) = self.parent_chain(parent_id)?;
        if self.folder_names.contains_key(&(parent_id, name.to_owned())) {
            return Err(StoreError::NameConflict(name.to_owned()));
        }

        let id = self.alloc();
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name: name.to_owned() });
        let now = Utc::now();
        self.folders.insert(
            id,
            FolderRecord {
                id,
                parent_id,
                name: name.to_owned(),
                path: format!("{parent_path}/{name}"),
                path_segments: segments,
                pinned: false,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        self.folder_names.insert((parent_id, name.to_owned()), id);
        Ok(id)
    }

    /// Reuse the active folder named `name` under `parent_id`, or create it.
    pub fn ensure_folder(&mut self, parent_id: Option<ItemId>, name: &str) -> StoreResult<(ItemId, bool)> {
        if let Some(&id) = self.folder_names.get(&(parent_id, name.to_owned())) {
            return Ok((id, false));
        }
        Ok((self.create_folder(parent_id, name)?, true))
    }

    /// Insert a file row.  The frame behind `storage_key` must already be
    /// durable on disk — the engine trusts the caller on ordering.
    pub fn insert_file(
        &mut self,
        folder_id: Option<ItemId>,
        name: &str,
        extension: &str,
        size: u64,
        storage_key: String,
        has_preview: bool,
    ) -> StoreResult<ItemId> {
        Self::validate_name(name)?;
        let extension = extension.to_ascii_lowercase();
        let (parent_path, parent_segments) = self.parent_chain(folder_id)?;
        if self
            .file_names
            .contains_key(&(folder_id, name.to_owned(), extension.clone()))
        {
            return Err(StoreError::NameConflict(display_of(name, &extension)));
        }

        let id = self.alloc();
        let display = display_of(name, &extension);
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name: display.clone() });
        let now = Utc::now();
        self.files.insert(
            id,
            FileRecord {
                id,
                folder_id,
                name: name.to_owned(),
                extension: extension.clone(),
                size,
                path: format!("{parent_path}/{display}"),
                path_segments: segments,
                storage_key,
                has_preview,
                pinned: false,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        self.file_names.insert((folder_id, name.to_owned(), extension), id);
        Ok(id)
    }

    // ── Rename / move ────────────────────────────────────────────────────

    pub fn rename_folder(&mut self, id: ItemId, new_name: &str) -> StoreResult<()> {
        Self::validate_name(new_name)?;
        let folder = self.active_folder(id)?;
        let (parent_id, old_name) = (folder.parent_id, folder.name.clone());
        if old_name == new_name {
            return Ok(());
        }
        if let Some(&other) = self.folder_names.get(&(parent_id, new_name.to_owned())) {
            if other != id {
                return Err(StoreError::NameConflict(new_name.to_owned()));
            }
        }

        let (parent_path, _) = self.parent_chain(parent_id)?;
        self.folder_names.remove(&(parent_id, old_name));
        self.folder_names.insert((parent_id, new_name.to_owned()), id);

        let f = self.folders.get_mut(&id).expect("checked above");
        f.name = new_name.to_owned();
        f.path = format!("{parent_path}/{new_name}");
        f.path_segments.last_mut().expect("own segment").name = new_name.to_owned();
        f.updated_at = Utc::now();

        self.rewrite_descendants(id);
        Ok(())
    }

    pub fn move_folder(&mut self, id: ItemId, new_parent: Option<ItemId>) -> StoreResult<()> {
        let folder = self.active_folder(id)?;
        let (old_parent, name) = (folder.parent_id, folder.name.clone());
        if new_parent == Some(id) {
            return Err(StoreError::CycleDetected);
        }
        if let Some(np) = new_parent {
            // The target's segment chain contains every ancestor; seeing
            // `id` there means the target sits inside the moved subtree.
            let target = self.active_folder(np)?;
            if target.path_segments.iter().any(|s| s.id == id) {
                return Err(StoreError::CycleDetected);
            }
        }
        if old_parent == new_parent {
            return Ok(());
        }
        if self.folder_names.contains_key(&(new_parent, name.clone())) {
            return Err(StoreError::NameConflict(name));
        }

        let (parent_path, parent_segments) = self.parent_chain(new_parent)?;
        self.folder_names.remove(&(old_parent, name.clone()));
        self.folder_names.insert((new_parent, name.clone()), id);

        let f = self.folders.get_mut(&id).expect("checked above");
        f.parent_id = new_parent;
        f.path = format!("{parent_path}/{name}");
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name });
        f.path_segments = segments;
        f.updated_at = Utc::now();

        self.rewrite_descendants(id);
        Ok(())
    }

    pub fn rename_file(&mut self, id: ItemId, new_name: &str) -> StoreResult<()> {
        Self::validate_name(new_name)?;
        let file = self.active_file(id)?;
        let (folder_id, old_name, ext) =
            (file.folder_id, file.name.clone(), file.extension.clone());
        if old_name == new_name {
            return Ok(());
        }
        if self
            .file_names
            .contains_key(&(folder_id, new_name.to_owned(), ext.clone()))
        {
            return Err(StoreError::NameConflict(display_of(new_name, &ext)));
        }

        let (parent_path, _) = self.parent_chain(folder_id)?;
        self.file_names.remove(&(folder_id, old_name, ext.clone()));
        self.file_names.insert((folder_id, new_name.to_owned(), ext), id);

        let f = self.files.get_mut(&id).expect("checked above");
        f.name = new_name.to_owned();
        let display = f.display_name();
        f.path = format!("{parent_path}/{display}");
        f.path_segments.last_mut().expect("own segment").name = display;
        f.updated_at = Utc::now();
        Ok(())
    }

    pub fn move_file(&mut self, id: ItemId, new_folder: Option<ItemId>) -> StoreResult<()> {
        let file = self.active_file(id)?;
        let (old_folder, name, ext) = (file.folder_id, file.name.clone(), file.extension.clone());
        if old_folder == new_folder {
            return Ok(());
        }
        let (parent_path, parent_segments) = self.parent_chain(new_folder)?;
        if self
            .file_names
            .contains_key(&(new_folder, name.clone(), ext.clone()))
        {
            return Err(StoreError::NameConflict(display_of(&name, &ext)));
        }

        self.file_names.remove(&(old_folder, name.clone(), ext.clone()));
        self.file_names.insert((new_folder, name, ext), id);

        let f = self.files.get_mut(&id).expect("checked above");
        f.folder_id = new_folder;
        let display = f.display_name();
        f.path = format!("{parent_path}/{display}");
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name: display });
        f.path_segments = segments;
        f.updated_at = Utc::now();
        Ok(())
    }

    /// Recompute `path`/`path_segments` for everything below `anchor` from
    /// the anchor's (already updated) chain.  Two-phase: all new values are
    /// computed before any record is written, and the apply loop is
    /// infallible — a partial rewrite cannot be observed.  Trashed
    /// descendants are rewritten too, so their paths stay truthful in
    /// trash listings.
    fn rewrite_descendants(&mut self, anchor: ItemId) {
        let anchor_segments = self.folders[&anchor].path_segments.clone();

        let rechain = |segments: &[PathSegment]| -> Option<(String, Vec<PathSegment>)> {
            let pos = segments.iter().position(|s| s.id == anchor)?;
            let mut chain = anchor_segments.clone();
            chain.extend_from_slice(&segments[pos + 1..]);
            let path = chain.iter().fold(String::new(), |mut acc, s| {
                acc.push('/');
                acc.push_str(&s.name);
                acc
            });
            Some((path, chain))
        };

        let folder_updates: Vec<(ItemId, String, Vec<PathSegment>)> = self
            .folders
            .values()
            .filter(|f| f.id != anchor)
            .filter_map(|f| rechain(&f.path_segments).map(|(p, c)| (f.id, p, c)))
            .collect();
        let file_updates: Vec<(ItemId, String, Vec<PathSegment>)> = self
            .files
            .values()
            .filter_map(|f| rechain(&f.path_segments).map(|(p, c)| (f.id, p, c)))
            .collect();

        for (id, path, chain) in folder_updates {
            let f = self.folders.get_mut(&id).expect("collected above");
            f.path = path;
            f.path_segments = chain;
        }
        for (id, path, chain) in file_updates {
            let f = self.files.get_mut(&id).expect("collected above");
            f.path = path;
            f.path_segments = chain;
        }
    }

    // ── Soft delete / restore ────────────────────────────────────────────

    /// Move a folder and its entire subtree to the trash.  One timestamp
    /// stamps the whole operation; descendants trashed earlier keep their
    /// own stamp and stay trashed if this folder is later restored.
    pub fn soft_delete_folder(&mut self, id: ItemId) -> StoreResult<()> {
        let folder = self
            .folders
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))?;
        if !folder.is_active() {
            return Ok(());
        }
        let stamp = Utc::now();

        let folder_ids: Vec<ItemId> = self
            .folders
            .values()
            .filter(|f| f.is_active() && f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();
        let file_ids: Vec<ItemId> = self
            .files
            .values()
            .filter(|f| f.is_active() && f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();

        for fid in folder_ids {
            let f = self.folders.get_mut(&fid).expect("collected above");
            f.deleted_at = Some(stamp);
            self.folder_names.remove(&(f.parent_id, f.name.clone()));
        }
        for fid in file_ids {
            let f = self.files.get_mut(&fid).expect("collected above");
            f.deleted_at = Some(stamp);
            self.file_names
                .remove(&(f.folder_id, f.name.clone(), f.extension.clone()));
        }
        Ok(())
    }

    pub fn soft_delete_file(&mut self, id: ItemId) -> StoreResult<()> {
        let file = self
            .files
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("file {id}")))?;
        if !file.is_active() {
            return Ok(());
        }
        file.deleted_at = Some(Utc::now());
        let key = (file.folder_id, file.name.clone(), file.extension.clone());
        self.file_names.remove(&key);
        Ok(())
    }

    /// Restore a trashed folder and the descendants trashed with it.
    ///
    /// Fails with `NameConflict` when an active sibling took the name in
    /// the meantime.  If the original parent is itself still trashed (or
    /// gone), the folder re-attaches to the account root.
    pub fn restore_folder(&mut self, id: ItemId) -> StoreResult<()> {
        let folder = self
            .folders
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))?;
        let stamp = folder
            .deleted_at
            .ok_or_else(|| StoreError::InvalidArgument(format!("folder {id} is not in trash")))?;
        let name = folder.name.clone();

        let target_parent = folder
            .parent_id
            .filter(|p| self.folders.get(p).is_some_and(|f| f.is_active()));
        if self.folder_names.contains_key(&(target_parent, name.clone())) {
            return Err(StoreError::NameConflict(name));
        }

        let (parent_path, parent_segments) = self.parent_chain(target_parent)?;
        let f = self.folders.get_mut(&id).expect("checked above");
        f.parent_id = target_parent;
        f.path = format!("{parent_path}/{name}");
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name: name.clone() });
        f.path_segments = segments;
        f.deleted_at = None;
        f.updated_at = Utc::now();
        self.folder_names.insert((target_parent, name), id);

        // Wake only the records stamped by the same soft-delete.
        let folder_ids: Vec<ItemId> = self
            .folders
            .values()
            .filter(|f| f.id != id && f.deleted_at == Some(stamp)
                && f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();
        let file_ids: Vec<ItemId> = self
            .files
            .values()
            .filter(|f| f.deleted_at == Some(stamp)
                && f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();

        for fid in &folder_ids {
            let f = self.folders.get_mut(fid).expect("collected above");
            f.deleted_at = None;
            self.folder_names.insert((f.parent_id, f.name.clone()), *fid);
        }
        for fid in &file_ids {
            let f = self.files.get_mut(fid).expect("collected above");
            f.deleted_at = None;
            self.file_names
                .insert((f.folder_id, f.name.clone(), f.extension.clone()), *fid);
        }

        self.rewrite_descendants(id);
        Ok(())
    }

    pub fn restore_file(&mut self, id: ItemId) -> StoreResult<()> {
        let file = self
            .files
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("file {id}")))?;
        file.deleted_at
            .ok_or_else(|| StoreError::InvalidArgument(format!("file {id} is not in trash")))?;
        let (name, ext) = (file.name.clone(), file.extension.clone());

        let target_folder = file
            .folder_id
            .filter(|p| self.folders.get(p).is_some_and(|f| f.is_active()));
        if self
            .file_names
            .contains_key(&(target_folder, name.clone(), ext.clone()))
        {
            return Err(StoreError::NameConflict(display_of(&name, &ext)));
        }

        let (parent_path, parent_segments) = self.parent_chain(target_folder)?;
        let f = self.files.get_mut(&id).expect("checked above");
        f.folder_id = target_folder;
        let display = f.display_name();
        f.path = format!("{parent_path}/{display}");
        let mut segments = parent_segments;
        segments.push(PathSegment { id, name: display });
        f.path_segments = segments;
        f.deleted_at = None;
        f.updated_at = Utc::now();
        self.file_names.insert((target_folder, name, ext), id);
        Ok(())
    }

    /// Undo a `Replace` soft-delete during ingest rollback.  No conflict
    /// check: the replacing row has already been discarded.
    pub(crate) fn undelete_file(&mut self, id: ItemId) {
        if let Some(f) = self.files.get_mut(&id) {
            f.deleted_at = None;
            self.file_names
                .insert((f.folder_id, f.name.clone(), f.extension.clone()), id);
        }
    }

    // ── Permanent delete ─────────────────────────────────────────────────

    /// Remove a file row for good.  Returns the storage handle so the
    /// caller can reclaim the frame and the quota.
    pub fn permanent_delete_file(&mut self, id: ItemId) -> StoreResult<RemovedFile> {
        let file = self
            .files
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("file {id}")))?;
        if file.is_active() {
            self.file_names
                .remove(&(file.folder_id, file.name.clone(), file.extension.clone()));
        }
        Ok(RemovedFile { storage_key: file.storage_key, size: file.size })
    }

    /// Remove a folder and every descendant for good.
    pub fn permanent_delete_folder(&mut self, id: ItemId) -> StoreResult<Vec<RemovedFile>> {
        if !self.folders.contains_key(&id) {
            return Err(StoreError::NotFound(format!("folder {id}")));
        }
        let folder_ids: Vec<ItemId> = self
            .folders
            .values()
            .filter(|f| f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();
        let file_ids: Vec<ItemId> = self
            .files
            .values()
            .filter(|f| f.path_segments.iter().any(|s| s.id == id))
            .map(|f| f.id)
            .collect();

        let mut removed = Vec::with_capacity(file_ids.len());
        for fid in file_ids {
            removed.push(self.permanent_delete_file(fid)?);
        }
        for fid in folder_ids {
            let f = self.folders.remove(&fid).expect("collected above");
            if f.is_active() {
                self.folder_names.remove(&(f.parent_id, f.name));
            }
        }
        Ok(removed)
    }

    /// Permanent-delete every trashed record.  Children of trashed folders
    /// are themselves stamped, so clearing all stamped rows empties whole
    /// subtrees.
    pub fn empty_trash(&mut self) -> Vec<RemovedFile> {
        let file_ids: Vec<ItemId> = self
            .files
            .values()
            .filter(|f| !f.is_active())
            .map(|f| f.id)
            .collect();
        let removed = file_ids
            .into_iter()
            .map(|id| {
                let f = self.files.remove(&id).expect("collected above");
                RemovedFile { storage_key: f.storage_key, size: f.size }
            })
            .collect();
        self.folders.retain(|_, f| f.is_active());
        removed
    }

    // ── Listings ─────────────────────────────────────────────────────────

    pub fn list_contents(
        &self,
        parent: Option<ItemId>,
        include_deleted: bool,
    ) -> StoreResult<FolderListing> {
        let breadcrumbs = match parent {
            None => Vec::new(),
            Some(id) => self
                .folders
                .get(&id)
                .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))?
                .path_segments
                .clone(),
        };

        let mut folders: Vec<FolderRecord> = self
            .folders
            .values()
            .filter(|f| f.parent_id == parent && (include_deleted || f.is_active()))
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files: Vec<FileRecord> = self
            .files
            .values()
            .filter(|f| f.folder_id == parent && (include_deleted || f.is_active()))
            .cloned()
            .collect();
        files.sort_by_key(|f| f.display_name());

        Ok(FolderListing { breadcrumbs, folders, files })
    }

    /// Roots of trashed subtrees: trashed items whose parent is not itself
    /// trashed.
    pub fn list_trash(&self) -> (Vec<FolderRecord>, Vec<FileRecord>) {
        let parent_trashed = |parent: Option<ItemId>| {
            parent
                .and_then(|p| self.folders.get(&p))
                .is_some_and(|f| !f.is_active())
        };
        let mut folders: Vec<FolderRecord> = self
            .folders
            .values()
            .filter(|f| !f.is_active() && !parent_trashed(f.parent_id))
            .cloned()
            .collect();
        folders.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        let mut files: Vec<FileRecord> = self
            .files
            .values()
            .filter(|f| !f.is_active() && !parent_trashed(f.folder_id))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        (folders, files)
    }

    pub fn list_pinned(&self, offset: usize, limit: usize) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .folders
            .values()
            .filter(|f| f.is_active() && f.pinned)
            .cloned()
            .map(Item::Folder)
            .chain(
                self.files
                    .values()
                    .filter(|f| f.is_active() && f.pinned)
                    .cloned()
                    .map(Item::File),
            )
            .collect();
        items.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        items.into_iter().skip(offset).take(limit).collect()
    }

    pub fn list_recent(&self, limit: usize) -> Vec<FileRecord> {
        let mut files: Vec<FileRecord> = self
            .files
            .values()
            .filter(|f| f.is_active())
            .cloned()
            .collect();
        files.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        files.truncate(limit);
        files
    }

    /// Case-insensitive substring search over active item names.
    pub fn search(&self, query: &str, filter: &SearchFilter) -> Vec<Item> {
        let needle = query.to_lowercase();
        let date_ok = |t: DateTime<Utc>| {
            filter.updated_after.map_or(true, |a| t >= a)
                && filter.updated_before.map_or(true, |b| t <= b)
        };

        let mut hits: Vec<Item> = Vec::new();

        if filter.kind != Some(ItemKind::File) && filter.category.is_none() {
            hits.extend(
                self.folders
                    .values()
                    .filter(|f| f.is_active())
                    .filter(|f| f.name.to_lowercase().contains(&needle))
                    .filter(|f| filter.pinned.map_or(true, |p| f.pinned == p))
                    .filter(|f| date_ok(f.updated_at))
                    .cloned()
                    .map(Item::Folder),
            );
        }
        if filter.kind != Some(ItemKind::Folder) {
            hits.extend(
                self.files
                    .values()
                    .filter(|f| f.is_active())
                    .filter(|f| f.display_name().to_lowercase().contains(&needle))
                    .filter(|f| {
                        filter
                            .category
                            .map_or(true, |c| MediaCategory::of(&f.extension) == c)
                    })
                    .filter(|f| filter.pinned.map_or(true, |p| f.pinned == p))
                    .filter(|f| date_ok(f.updated_at))
                    .cloned()
                    .map(Item::File),
            );
        }

        hits.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        hits
    }

    // ── Properties ───────────────────────────────────────────────────────

    pub fn set_folder_pinned(&mut self, id: ItemId, pinned: bool) -> StoreResult<()> {
        self.active_folder(id)?;
        let f = self.folders.get_mut(&id).expect("checked above");
        f.pinned = pinned;
        f.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_file_pinned(&mut self, id: ItemId, pinned: bool) -> StoreResult<()> {
        self.active_file(id)?;
        let f = self.files.get_mut(&id).expect("checked above");
        f.pinned = pinned;
        f.updated_at = Utc::now();
        Ok(())
    }

    // ── Path resolution ──────────────────────────────────────────────────

    /// Resolve an absolute path like `/docs/img/logo.png` to an active
    /// item.  The root itself is not an item and resolves to `None`.
    pub fn resolve_path(&self, path: &str) -> Option<Item> {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        components.peek()?;

        let mut parent: Option<ItemId> = None;
        while let Some(component) = components.next() {
            let last = components.peek().is_none();
            if let Some(&fid) = self.folder_names.get(&(parent, component.to_owned())) {
                if last {
                    return self.folders.get(&fid).cloned().map(Item::Folder);
                }
                parent = Some(fid);
                continue;
            }
            if last {
                return self
                    .files
                    .values()
                    .find(|f| {
                        f.is_active() && f.folder_id == parent && f.display_name() == component
                    })
                    .cloned()
                    .map(Item::File);
            }
            return None;
        }
        None
    }
}

fn display_of(name: &str, extension: &str) -> String {
    if extension.is_empty() {
        name.to_owned()
    } else {
        format!("{name}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The §path invariant: every record's path is the "/"-join of its
    /// segment names and the last segment is the record itself.
    fn assert_path_invariants(ns: &Namespace) {
        for f in ns.folders.values() {
            let joined: String =
                f.path_segments.iter().map(|s| format!("/{}", s.name)).collect();
            assert_eq!(f.path, joined, "folder {} path drifted", f.id);
            assert_eq!(f.path_segments.last().unwrap().id, f.id);
            assert_eq!(f.path_segments.last().unwrap().name, f.name);
        }
        for f in ns.files.values() {
            let joined: String =
                f.path_segments.iter().map(|s| format!("/{}", s.name)).collect();
            assert_eq!(f.path, joined, "file {} path drifted", f.id);
            assert_eq!(f.path_segments.last().unwrap().id, f.id);
            assert_eq!(f.path_segments.last().unwrap().name, f.display_name());
        }
    }

    fn sample_tree() -> (Namespace, ItemId, ItemId, ItemId) {
        let mut ns = Namespace::new();
        let docs = ns.create_folder(None, "docs").unwrap();
        let img = ns.create_folder(Some(docs), "img").unwrap();
        let readme = ns
            .insert_file(Some(docs), "readme", "md", 5, "file-aa.md".into(), false)
            .unwrap();
        ns.insert_file(Some(img), "logo", "png", 9, "file-bb.png".into(), false)
            .unwrap();
        (ns, docs, img, readme)
    }

    #[test]
    fn create_builds_denormalised_paths() {
        let (ns, docs, img, readme) = sample_tree();
        assert_eq!(ns.folder(docs).unwrap().path, "/docs");
        assert_eq!(ns.folder(img).unwrap().path, "/docs/img");
        assert_eq!(ns.file(readme).unwrap().path, "/docs/readme.md");
        assert_eq!(ns.folder(img).unwrap().path_segments.len(), 2);
        assert_path_invariants(&ns);
    }

    #[test]
    fn sibling_names_are_unique() {
        let (mut ns, docs, _, _) = sample_tree();
        assert!(matches!(
            ns.create_folder(None, "docs"),
            Err(StoreError::NameConflict(_))
        ));
        assert!(matches!(
            ns.insert_file(Some(docs), "readme", "md", 1, "file-cc.md".into(), false),
            Err(StoreError::NameConflict(_))
        ));
        // Same base name with a different extension is fine.
        ns.insert_file(Some(docs), "readme", "txt", 1, "file-dd.txt".into(), false)
            .unwrap();
    }

    #[test]
    fn rename_folder_rewrites_descendants() {
        let (mut ns, docs, img, readme) = sample_tree();
        ns.rename_folder(docs, "papers").unwrap();

        assert_eq!(ns.folder(docs).unwrap().path, "/papers");
        assert_eq!(ns.folder(img).unwrap().path, "/papers/img");
        assert_eq!(ns.file(readme).unwrap().path, "/papers/readme.md");
        // Same id, new name, in every descendant's chain.
        let seg = &ns.folder(img).unwrap().path_segments[0];
        assert_eq!((seg.id, seg.name.as_str()), (docs, "papers"));
        // Storage keys untouched.
        assert_eq!(ns.file(readme).unwrap().storage_key, "file-aa.md");
        assert_path_invariants(&ns);
    }

    #[test]
    fn move_folder_rejects_cycles() {
        let (mut ns, docs, img, _) = sample_tree();
        assert!(matches!(ns.move_folder(docs, Some(img)), Err(StoreError::CycleDetected)));
        assert!(matches!(ns.move_folder(docs, Some(docs)), Err(StoreError::CycleDetected)));
        // Nothing changed.
        assert_eq!(ns.folder(img).unwrap().path, "/docs/img");
        assert_path_invariants(&ns);
    }

    #[test]
    fn move_folder_recomputes_subtree() {
        let (mut ns, docs, img, _) = sample_tree();
        let attic = ns.create_folder(None, "attic").unwrap();
        ns.move_folder(img, Some(attic)).unwrap();
        assert_eq!(ns.folder(img).unwrap().path, "/attic/img");
        let logo = ns.resolve_path("/attic/img/logo.png").unwrap();
        assert_eq!(logo.path(), "/attic/img/logo.png");
        assert!(ns.resolve_path("/docs/img").is_none());
        let _ = docs;
        assert_path_invariants(&ns);
    }

    #[test]
    fn soft_delete_frees_the_name_and_restore_conflicts() {
        let (mut ns, docs, _, _) = sample_tree();
        ns.soft_delete_folder(docs).unwrap();
        // The name is free for a new folder now.
        let second = ns.create_folder(None, "docs").unwrap();
        assert_ne!(second, docs);
        // Restoring the original collides.
        assert!(matches!(ns.restore_folder(docs), Err(StoreError::NameConflict(_))));
        assert_path_invariants(&ns);
    }

    #[test]
    fn soft_delete_stamps_subtree_and_restore_wakes_it() {
        let (mut ns, docs, img, readme) = sample_tree();
        ns.soft_delete_folder(docs).unwrap();
        assert!(!ns.folder(img).unwrap().is_active());
        assert!(!ns.file(readme).unwrap().is_active());

        ns.restore_folder(docs).unwrap();
        assert!(ns.folder(img).unwrap().is_active());
        assert!(ns.file(readme).unwrap().is_active());
        assert_path_invariants(&ns);
    }

    #[test]
    fn earlier_trashed_items_stay_trashed_on_restore() {
        let (mut ns, docs, _, readme) = sample_tree();
        ns.soft_delete_file(readme).unwrap();
        ns.soft_delete_folder(docs).unwrap();
        ns.restore_folder(docs).unwrap();
        // The file was trashed separately, before the folder — it stays.
        assert!(!ns.file(readme).unwrap().is_active());
        assert!(ns.folder(docs).unwrap().is_active());
    }

    #[test]
    fn restore_under_trashed_parent_reroots() {
        let (mut ns, docs, img, _) = sample_tree();
        ns.soft_delete_folder(img).unwrap();
        ns.soft_delete_folder(docs).unwrap();
        // Restore the inner folder while its parent is still in trash.
        ns.restore_folder(img).unwrap();
        let f = ns.folder(img).unwrap();
        assert_eq!(f.parent_id, None);
        assert_eq!(f.path, "/img");
        assert_path_invariants(&ns);
    }

    #[test]
    fn permanent_delete_returns_storage_handles() {
        let (mut ns, docs, _, _) = sample_tree();
        let removed = ns.permanent_delete_folder(docs).unwrap();
        let mut keys: Vec<&str> = removed.iter().map(|r| r.storage_key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["file-aa.md", "file-bb.png"]);
        assert_eq!(removed.iter().map(|r| r.size).sum::<u64>(), 14);
        assert!(ns.folder(docs).is_none());
        assert_eq!(ns.total_billable_bytes(), 0);
    }

    #[test]
    fn empty_trash_clears_stamped_subtrees() {
        let (mut ns, docs, _, _) = sample_tree();
        ns.soft_delete_folder(docs).unwrap();
        assert_eq!(ns.total_billable_bytes(), 14); // trash is billable
        let removed = ns.empty_trash();
        assert_eq!(removed.len(), 2);
        assert!(ns.folders.is_empty());
        assert!(ns.files.is_empty());
    }

    #[test]
    fn trash_lists_only_subtree_roots() {
        let (mut ns, docs, img, readme) = sample_tree();
        ns.soft_delete_folder(docs).unwrap();
        let (folders, files) = ns.list_trash();
        assert_eq!(folders.iter().map(|f| f.id).collect::<Vec<_>>(), [docs]);
        assert!(files.is_empty());
        let _ = (img, readme);
    }

    #[test]
    fn listing_excludes_trash_unless_asked() {
        let (mut ns, docs, _, readme) = sample_tree();
        ns.soft_delete_file(readme).unwrap();
        let listing = ns.list_contents(Some(docs), false).unwrap();
        assert!(listing.files.is_empty());
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.breadcrumbs.len(), 1);
        let with_trash = ns.list_contents(Some(docs), true).unwrap();
        assert_eq!(with_trash.files.len(), 1);
    }

    #[test]
    fn search_filters_compose() {
        let (mut ns, _, _, readme) = sample_tree();
        ns.set_file_pinned(readme, true).unwrap();

        let hits = ns.search("ReadMe", &SearchFilter::default());
        assert_eq!(hits.len(), 1);

        let image_hits = ns.search(
            "o",
            &SearchFilter { category: Some(MediaCategory::Image), ..Default::default() },
        );
        assert_eq!(image_hits.len(), 1);
        assert_eq!(image_hits[0].display_name(), "logo.png");

        let pinned_hits = ns.search(
            "",
            &SearchFilter { pinned: Some(true), ..Default::default() },
        );
        assert_eq!(pinned_hits.len(), 1);
        assert_eq!(pinned_hits[0].id(), readme);
    }

    #[test]
    fn pins_paginate_by_recency() {
        let (mut ns, docs, img, readme) = sample_tree();
        ns.set_folder_pinned(docs, true).unwrap();
        ns.set_folder_pinned(img, true).unwrap();
        ns.set_file_pinned(readme, true).unwrap();
        let page = ns.list_pinned(0, 2);
        assert_eq!(page.len(), 2);
        let rest = ns.list_pinned(2, 2);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn indexes_rebuild_after_snapshot_roundtrip() {
        let (ns, _, _, _) = sample_tree();
        let json = serde_json::to_string(&ns).unwrap();
        let mut back: Namespace = serde_json::from_str(&json).unwrap();
        back.rebuild_indexes();
        assert!(matches!(
            back.create_folder(None, "docs"),
            Err(StoreError::NameConflict(_))
        ));
        assert!(back.resolve_path("/docs/img/logo.png").is_some());
    }
}
