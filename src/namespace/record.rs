//! Namespace records — the rows the engine maintains.
//!
//! Both record kinds carry the same denormalised envelope: `path` is the
//! "/"-joined chain of segment names from the account root to the item,
//! and `path_segments` is that chain as `{id, name}` pairs with the item
//! itself as the last entry.  The engine keeps both in lock-step under
//! every rename, move, soft-delete, and restore; nothing else may write
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable arena identifier.  Ids are allocated monotonically per namespace
/// and never reused, so a deleted id stays dangling rather than aliasing.
pub type ItemId = u64;

/// One hop of the root→item chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub id: ItemId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: ItemId,
    /// `None` means the account root.
    pub parent_id: Option<ItemId>,
    pub name: String,
    pub path: String,
    pub path_segments: Vec<PathSegment>,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FolderRecord {
    /// Active records participate in sibling-name uniqueness; trashed ones
    /// do not.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: ItemId,
    /// `None` means the account root.
    pub folder_id: Option<ItemId>,
    /// Base name without the extension.
    pub name: String,
    /// Lowercased extension without the dot; may be empty.
    pub extension: String,
    /// Plaintext byte length — the quota unit.
    pub size: u64,
    pub path: String,
    pub path_segments: Vec<PathSegment>,
    /// The only handle to the on-disk frame.  Content-opaque.
    pub storage_key: String,
    pub has_preview: bool,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The name as listed and as used in `path`/`path_segments`.
    pub fn display_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }
}

// ── Tagged item ──────────────────────────────────────────────────────────────

/// A folder or a file, for mixed listings (pins, search results).
#[derive(Debug, Clone, Serialize)]
pub enum Item {
    Folder(FolderRecord),
    File(FileRecord),
}

impl Item {
    pub fn id(&self) -> ItemId {
        match self {
            Item::Folder(f) => f.id,
            Item::File(f) => f.id,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Item::Folder(f) => f.name.clone(),
            Item::File(f) => f.display_name(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Item::Folder(f) => &f.path,
            Item::File(f) => &f.path,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Item::Folder(f) => f.updated_at,
            Item::File(f) => f.updated_at,
        }
    }
}

// ── Listings ─────────────────────────────────────────────────────────────────

/// Immediate children of one folder, plus the breadcrumb chain of the
/// folder itself (empty at the account root).
#[derive(Debug, Clone, Serialize)]
pub struct FolderListing {
    pub breadcrumbs: Vec<PathSegment>,
    pub folders: Vec<FolderRecord>,
    pub files: Vec<FileRecord>,
}

/// Storage handle of a permanently deleted file, returned so the caller
/// can reclaim the frame and the quota — the namespace engine itself never
/// touches the disk.
#[derive(Debug, Clone)]
pub struct RemovedFile {
    pub storage_key: String,
    pub size: u64,
}

// ── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    File,
}

/// Conjunctive search filters; `None` means "don't care".
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<ItemKind>,
    pub category: Option<crate::media::MediaCategory>,
    pub pinned: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}
