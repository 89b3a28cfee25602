//! Ingest pipeline — the all-or-none write path.
//!
//! A batch is a list of items: leaf files, or archives whose internal
//! directory structure is materialised as folders under the batch target.
//! The pipeline runs in fixed phases:
//!
//! 1. **Plan** — walk archive entries, drop junk (`.`-prefixed names,
//!    `Thumbs.db`, `__MACOSX` and friends), derive the folder plan sorted
//!    by depth so parents precede children.
//! 2. **Admit** — reject the whole batch up front when any limit would be
//!    crossed.  No partial admit.
//! 3. **Reserve** — create (or reuse) the planned folders in order.
//! 4. **Stream** — seal and persist each leaf, then insert its row.  The
//!    frame rename completes before the row exists, so a reader can never
//!    see a row without its frame.
//! 5. **Commit** — charge the summed plaintext size against the quota.
//!
//! Every side effect is recorded in an explicit rollback journal (storage
//! keys written, rows created, soft-deletes performed by `Replace`).  Any
//! failure or cancellation consults the journal and unwinds everything;
//! `used_bytes` is only touched at commit.

use crate::account::Account;
use crate::blob::BlobStore;
use crate::cancel::CancelToken;
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::media;
use crate::namespace::{ItemId, Namespace};

// ── Batch input ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum UploadItem {
    /// A leaf file; `name` carries the extension (`report.pdf`).
    File { name: String, data: Vec<u8> },
    /// An archive to materialise.  `name` is diagnostic only — entries are
    /// created directly under the batch target.
    Archive { name: String, entries: Vec<ArchiveEntry> },
}

/// One archive entry: a directory (`data: None`) or a file.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Relative path inside the archive, `/`-separated.
    pub path: String,
    pub data: Option<Vec<u8>>,
}

/// What to do when a leaf collides with an active file of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateAction {
    /// Fail the batch with `NameConflict` (the default).
    #[default]
    Error,
    /// Soft-delete the existing file and take its name.
    Replace,
    /// Append " (n)" with the smallest free n ≥ 1.
    KeepBoth,
}

impl DuplicateAction {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(DuplicateAction::Error),
            "replace" => Some(DuplicateAction::Replace),
            "keep-both" | "keepboth" => Some(DuplicateAction::KeepBoth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Target folder; `None` is the account root.
    pub parent: Option<ItemId>,
    pub items: Vec<UploadItem>,
    pub duplicate_action: DuplicateAction,
}

// ── Batch result ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub file_id: ItemId,
    pub display_name: String,
    pub storage_key: String,
    pub byte_size: u64,
    pub has_preview: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: Vec<IngestedFile>,
    pub folders_created: usize,
    pub total_bytes: u64,
}

// ── Junk filter ──────────────────────────────────────────────────────────────

/// Archive entries that are never materialised: hidden files (leading `.`,
/// which covers `._*` and `.DS_Store`), `Thumbs.db`, resource directories
/// with a `__` prefix (`__MACOSX`), and anything nested under one.
fn is_junk(path: &str) -> bool {
    path.split('/').filter(|c| !c.is_empty()).any(|component| {
        component.starts_with('.') || component.starts_with("__") || component == "Thumbs.db"
    })
}

/// Split `report.pdf` into `("report", "pdf")`.  A leading-dot name or a
/// missing dot yields an empty extension.
fn split_name(file_name: &str) -> (String, String) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), ext.to_ascii_lowercase()),
        _ => (file_name.to_owned(), String::new()),
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────────

struct LeafPlan {
    /// Folder chain relative to the batch target; empty = target itself.
    folder: Vec<String>,
    name: String,
    extension: String,
    data: Vec<u8>,
}

struct Plan {
    /// Relative folder chains, depth ascending, parents before children.
    folders: Vec<Vec<String>>,
    leaves: Vec<LeafPlan>,
    total_bytes: u64,
}

fn normalize_entry_path(raw: &str) -> StoreResult<Vec<String>> {
    let components: Vec<String> = raw
        .split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect();
    if components.is_empty() || components.iter().any(|c| c == "." || c == "..") {
        return Err(StoreError::InvalidArgument(format!(
            "illegal archive entry path \"{raw}\""
        )));
    }
    Ok(components)
}

fn build_plan(items: &[UploadItem]) -> StoreResult<Plan> {
    let mut folders: Vec<Vec<String>> = Vec::new();
    let mut leaves: Vec<LeafPlan> = Vec::new();

    let want_folder = |chain: &[String], folders: &mut Vec<Vec<String>>| {
        for depth in 1..=chain.len() {
            let prefix = chain[..depth].to_vec();
            if !folders.contains(&prefix) {
                folders.push(prefix);
            }
        }
    };

    for item in items {
        match item {
            UploadItem::File { name, data } => {
                let (stem, extension) = split_name(name);
                leaves.push(LeafPlan {
                    folder: Vec::new(),
                    name: stem,
                    extension,
                    data: data.clone(),
                });
            }
            UploadItem::Archive { entries, .. } => {
                for entry in entries {
                    if is_junk(&entry.path) {
                        log::debug!("skipping junk archive entry {}", entry.path);
                        continue;
                    }
                    let components = normalize_entry_path(&entry.path)?;
                    match &entry.data {
                        None => want_folder(&components, &mut folders),
                        Some(data) => {
                            let (dirs, file) = components.split_at(components.len() - 1);
                            want_folder(dirs, &mut folders);
                            let (stem, extension) = split_name(&file[0]);
                            leaves.push(LeafPlan {
                                folder: dirs.to_vec(),
                                name: stem,
                                extension,
                                data: data.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    folders.sort_by_key(|chain| (chain.len(), chain.clone()));
    let total_bytes = leaves.iter().map(|l| l.data.len() as u64).sum();
    Ok(Plan { folders, leaves, total_bytes })
}

// ── Admit ────────────────────────────────────────────────────────────────────

fn admit(
    config: &StoreConfig,
    account: &Account,
    ns: &Namespace,
    parent: Option<ItemId>,
    plan: &Plan,
) -> StoreResult<()> {
    if plan.leaves.len() > config.max_files_per_batch {
        return Err(StoreError::BatchFileCountExceeded {
            count: plan.leaves.len(),
            limit: config.max_files_per_batch,
        });
    }
    if plan.total_bytes > config.max_bytes_per_batch {
        return Err(StoreError::BatchSizeExceeded {
            total: plan.total_bytes,
            limit: config.max_bytes_per_batch,
        });
    }
    if plan.total_bytes > account.available_bytes() {
        return Err(StoreError::QuotaExceeded {
            needed: plan.total_bytes,
            available: account.available_bytes(),
        });
    }

    // Per-folder child budget.  Resolve which planned folders already
    // exist (read-only) so reuse does not count as a new child.
    let resolve = |chain: &[String]| -> Option<ItemId> {
        let mut at = parent;
        for name in chain {
            match ns
                .list_contents(at, false)
                .ok()?
                .folders
                .iter()
                .find(|f| &f.name == name)
            {
                Some(f) => at = Some(f.id),
                None => return None,
            }
        }
        at
    };

    let mut additions: Vec<(Vec<String>, usize)> = Vec::new();
    let bump = |chain: &[String], additions: &mut Vec<(Vec<String>, usize)>| {
        if let Some(entry) = additions.iter_mut().find(|(c, _)| c == chain) {
            entry.1 += 1;
        } else {
            additions.push((chain.to_vec(), 1));
        }
    };
    for chain in &plan.folders {
        // Reusing an existing folder adds no child to its parent.
        if resolve(chain).is_none() {
            bump(&chain[..chain.len() - 1], &mut additions);
        }
    }
    for leaf in &plan.leaves {
        bump(&leaf.folder, &mut additions);
    }

    for (chain, added) in additions {
        let existing = match (chain.is_empty(), resolve(&chain)) {
            (true, _) => ns.active_child_count(parent),
            (false, Some(id)) => ns.active_child_count(Some(id)),
            (false, None) => 0,
        };
        if existing + added > config.max_files_per_folder {
            let folder = if chain.is_empty() { "/".to_owned() } else { chain.join("/") };
            return Err(StoreError::FolderFileCountExceeded {
                folder,
                limit: config.max_files_per_folder,
            });
        }
    }
    Ok(())
}

// ── Rollback journal ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Journal {
    storage_keys: Vec<String>,
    file_rows: Vec<ItemId>,
    folder_rows: Vec<ItemId>,
    replaced: Vec<ItemId>,
}

impl Journal {
    /// Undo everything, best-effort, in reverse dependency order.  Called
    /// on any failure or cancellation; errors during unwind are logged and
    /// swallowed so the original error surfaces.
    fn unwind(self, blobs: &BlobStore, account: &Account, ns: &mut Namespace) {
        log::warn!(
            "rolling back ingest: {} file row(s), {} folder row(s), {} frame(s)",
            self.file_rows.len(),
            self.folder_rows.len(),
            self.storage_keys.len(),
        );
        for id in self.file_rows {
            let _ = ns.permanent_delete_file(id);
        }
        for id in self.folder_rows.into_iter().rev() {
            let _ = ns.permanent_delete_folder(id);
        }
        for id in self.replaced {
            ns.undelete_file(id);
        }
        for key in self.storage_keys {
            if let Err(e) = blobs.delete(account.id, &key) {
                log::warn!("rollback could not delete frame {key}: {e}");
            }
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Run one ingest batch to completion or to a clean rollback.
pub fn ingest(
    config: &StoreConfig,
    blobs: &BlobStore,
    account: &mut Account,
    ns: &mut Namespace,
    request: IngestRequest,
    cancel: &CancelToken,
) -> StoreResult<IngestReport> {
    // Target must be live before any planning.
    if let Some(parent) = request.parent {
        ns.folder(parent)
            .filter(|f| f.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("folder {parent}")))?;
    }

    let plan = build_plan(&request.items)?;
    admit(config, account, ns, request.parent, &plan)?;

    let mut journal = Journal::default();
    match run_phases(blobs, account, ns, &request, plan, cancel, &mut journal) {
        Ok(report) => Ok(report),
        Err(e) => {
            journal.unwind(blobs, account, ns);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_phases(
    blobs: &BlobStore,
    account: &mut Account,
    ns: &mut Namespace,
    request: &IngestRequest,
    plan: Plan,
    cancel: &CancelToken,
    journal: &mut Journal,
) -> StoreResult<IngestReport> {
    // ── Reserve folders, parents first ──────────────────────────────────
    let mut folder_ids: Vec<(Vec<String>, ItemId)> = Vec::new();
    let mut folders_created = 0usize;
    for chain in &plan.folders {
        cancel.check()?;
        let parent = match chain.len() {
            1 => request.parent,
            n => Some(
                folder_ids
                    .iter()
                    .find(|(c, _)| c == &chain[..n - 1])
                    .expect("parents precede children")
                    .1,
            ),
        };
        let (id, created) = ns.ensure_folder(parent, chain.last().expect("non-empty chain"))?;
        if created {
            journal.folder_rows.push(id);
            folders_created += 1;
        }
        folder_ids.push((chain.clone(), id));
    }

    // ── Seal ahead of the write phase ───────────────────────────────────
    let sealed = seal_leaves(&plan.leaves, &account.cipher_key, cancel)?;

    // ── Stream files ────────────────────────────────────────────────────
    let mut report = IngestReport { total_bytes: plan.total_bytes, folders_created, ..Default::default() };
    for (leaf, sealed) in plan.leaves.iter().zip(sealed) {
        cancel.check()?;

        let folder = if leaf.folder.is_empty() {
            request.parent
        } else {
            Some(
                folder_ids
                    .iter()
                    .find(|(c, _)| c == &leaf.folder)
                    .expect("reserved above")
                    .1,
            )
        };

        let name = resolve_duplicate(ns, journal, folder, leaf, request.duplicate_action)?;

        let receipt = blobs.put_sealed(
            account.id,
            &sealed,
            &leaf.extension,
            leaf.data.len() as u64,
        )?;
        journal.storage_keys.push(receipt.storage_key.clone());

        // Preview is best-effort: failure logs and moves on.
        let mut has_preview = false;
        if let Some(preview) = media::render_preview(&leaf.extension, &leaf.data) {
            match blobs.put_preview(
                account.id,
                &account.cipher_key,
                &receipt.storage_key,
                &preview,
            ) {
                Ok(()) => has_preview = true,
                Err(e) => log::warn!("preview for {} failed: {e}", receipt.storage_key),
            }
        }

        let file_id = ns.insert_file(
            folder,
            &name,
            &leaf.extension,
            receipt.byte_size,
            receipt.storage_key.clone(),
            has_preview,
        )?;
        journal.file_rows.push(file_id);

        log::debug!("ingested {} ({} B) as {}", name, receipt.byte_size, receipt.storage_key);
        report.files.push(IngestedFile {
            file_id,
            display_name: ns.file(file_id).expect("just inserted").display_name(),
            storage_key: receipt.storage_key,
            byte_size: receipt.byte_size,
            has_preview,
        });
    }

    // ── Commit ──────────────────────────────────────────────────────────
    cancel.check()?;
    account.charge(plan.total_bytes)?;
    Ok(report)
}

/// Apply the duplicate policy for one leaf, returning the name to insert
/// under.  `Replace` soft-deletes the incumbent and records it for
/// rollback.
fn resolve_duplicate(
    ns: &mut Namespace,
    journal: &mut Journal,
    folder: Option<ItemId>,
    leaf: &LeafPlan,
    action: DuplicateAction,
) -> StoreResult<String> {
    let incumbent = ns.find_active_file(folder, &leaf.name, &leaf.extension);
    match (incumbent, action) {
        (None, _) => Ok(leaf.name.clone()),
        (Some(_), DuplicateAction::Error) => Err(StoreError::NameConflict(if leaf
            .extension
            .is_empty()
        {
            leaf.name.clone()
        } else {
            format!("{}.{}", leaf.name, leaf.extension)
        })),
        (Some(id), DuplicateAction::Replace) => {
            ns.soft_delete_file(id)?;
            journal.replaced.push(id);
            Ok(leaf.name.clone())
        }
        (Some(_), DuplicateAction::KeepBoth) => {
            let mut n = 1usize;
            loop {
                let candidate = format!("{} ({n})", leaf.name);
                if ns.find_active_file(folder, &candidate, &leaf.extension).is_none() {
                    return Ok(candidate);
                }
                n += 1;
            }
        }
    }
}

/// Seal every leaf payload.  With the `parallel` feature the batch fans
/// out on Rayon; the write phase stays sequential either way.
fn seal_leaves(
    leaves: &[LeafPlan],
    cipher_key: &[u8],
    cancel: &CancelToken,
) -> StoreResult<Vec<Vec<u8>>> {
    cancel.check()?;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        Ok(leaves
            .par_iter()
            .map(|leaf| codec::seal(&leaf.data, cipher_key))
            .collect())
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut out = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            cancel.check()?;
            out.push(codec::seal(&leaf.data, cipher_key));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rig(config: StoreConfig) -> (TempDir, StoreConfig, BlobStore, Account, Namespace) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            uploads_dir: dir.path().join("uploads"),
            avatars_dir: dir.path().join("avatars"),
            ..config
        };
        let blobs = BlobStore::new(&config);
        let account = Account::new("tester", config.default_quota_bytes);
        (dir, config, blobs, account, Namespace::new())
    }

    fn leaf(name: &str, data: &[u8]) -> UploadItem {
        UploadItem::File { name: name.to_owned(), data: data.to_vec() }
    }

    fn request(items: Vec<UploadItem>) -> IngestRequest {
        IngestRequest { parent: None, items, duplicate_action: DuplicateAction::Error }
    }

    #[test]
    fn junk_filter() {
        assert!(is_junk("__MACOSX/x"));
        assert!(is_junk(".DS_Store"));
        assert!(is_junk("docs/.hidden/file.txt"));
        assert!(is_junk("docs/._resource"));
        assert!(is_junk("photos/Thumbs.db"));
        assert!(!is_junk("docs/readme.md"));
        assert!(!is_junk("a_b/c__d.txt")); // inner underscores are fine
    }

    #[test]
    fn split_names() {
        assert_eq!(split_name("report.PDF"), ("report".into(), "pdf".into()));
        assert_eq!(split_name("Makefile"), ("Makefile".into(), String::new()));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar".into(), "gz".into()));
        assert_eq!(split_name(".bashrc"), (".bashrc".into(), String::new()));
    }

    #[test]
    fn plain_upload_commits_rows_frames_and_quota() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        let report = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"hello"), leaf("b.txt", b"hello")]),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.total_bytes, 10);
        assert_eq!(account.used_bytes, 10);
        // Identical contents, unrelated keys.
        assert_ne!(report.files[0].storage_key, report.files[1].storage_key);
        for f in &report.files {
            let got = blobs
                .get(account.id, &account.cipher_key, &f.storage_key)
                .unwrap();
            assert_eq!(got, b"hello");
        }
    }

    #[test]
    fn archive_materialises_folders_and_skips_junk() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        let entries = vec![
            ArchiveEntry { path: "docs/readme.md".into(), data: Some(b"# hi".to_vec()) },
            ArchiveEntry { path: "docs/img/logo.png".into(), data: Some(vec![1, 2, 3]) },
            ArchiveEntry { path: "__MACOSX/x".into(), data: Some(vec![0]) },
            ArchiveEntry { path: ".DS_Store".into(), data: Some(vec![0]) },
            ArchiveEntry { path: "docs/empty/".into(), data: None },
        ];
        let report = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![UploadItem::Archive { name: "bundle.zip".into(), entries }]),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.folders_created, 3); // docs, docs/img, docs/empty
        assert!(ns.resolve_path("/docs/readme.md").is_some());
        assert!(ns.resolve_path("/docs/img/logo.png").is_some());
        assert!(ns.resolve_path("/docs/empty").is_some());
        assert!(ns.resolve_path("/__MACOSX").is_none());
        assert!(ns.resolve_path("/.DS_Store").is_none());
    }

    #[test]
    fn second_batch_reuses_existing_folders() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        let batch = |name: &str| {
            request(vec![UploadItem::Archive {
                name: "b.zip".into(),
                entries: vec![ArchiveEntry {
                    path: format!("docs/{name}"),
                    data: Some(b"x".to_vec()),
                }],
            }])
        };
        let first = ingest(&config, &blobs, &mut account, &mut ns, batch("one.txt"), &CancelToken::new()).unwrap();
        let second = ingest(&config, &blobs, &mut account, &mut ns, batch("two.txt"), &CancelToken::new()).unwrap();
        assert_eq!(first.folders_created, 1);
        assert_eq!(second.folders_created, 0);
        let listing = ns.list_contents(None, false).unwrap();
        assert_eq!(listing.folders.len(), 1);
    }

    #[test]
    fn oversized_batch_is_rejected_whole() {
        let (_dir, config, blobs, mut account, mut ns) =
            rig(StoreConfig { max_bytes_per_batch: 8, ..StoreConfig::default() });
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"12345"), leaf("b.txt", b"12345")]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::BatchSizeExceeded { total: 10, limit: 8 }));
        assert_eq!(account.used_bytes, 0);
        assert!(ns.list_contents(None, false).unwrap().files.is_empty());
    }

    #[test]
    fn file_count_and_quota_limits() {
        let (_dir, config, blobs, mut account, mut ns) =
            rig(StoreConfig { max_files_per_batch: 1, ..StoreConfig::default() });
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"x"), leaf("b.txt", b"y")]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::BatchFileCountExceeded { count: 2, limit: 1 }));

        account.quota_bytes = 3;
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"abcd")]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 4, available: 3 }));
    }

    #[test]
    fn folder_child_budget_counts_existing_children() {
        let (_dir, config, blobs, mut account, mut ns) =
            rig(StoreConfig { max_files_per_folder: 2, ..StoreConfig::default() });
        ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"x"), leaf("b.txt", b"y")]),
            &CancelToken::new(),
        )
        .unwrap();
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("c.txt", b"z")]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::FolderFileCountExceeded { .. }));
    }

    #[test]
    fn default_policy_conflicts_and_rolls_back_the_batch() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        // Same display name twice in one batch: the second leaf conflicts
        // with the row the first one just committed, and the whole batch —
        // including the first frame — must unwind.
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("dup.txt", b"one"), leaf("dup.txt", b"two")]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::NameConflict(_)));
        assert_eq!(account.used_bytes, 0);
        assert!(ns.list_contents(None, false).unwrap().files.is_empty());
        assert_eq!(ns.total_billable_bytes(), 0);
    }

    #[test]
    fn keep_both_appends_the_smallest_free_suffix() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        for _ in 0..3 {
            ingest(
                &config,
                &blobs,
                &mut account,
                &mut ns,
                IngestRequest {
                    parent: None,
                    items: vec![leaf("notes.txt", b"v")],
                    duplicate_action: DuplicateAction::KeepBoth,
                },
                &CancelToken::new(),
            )
            .unwrap();
        }
        let names: Vec<String> = ns
            .list_contents(None, false)
            .unwrap()
            .files
            .iter()
            .map(|f| f.display_name())
            .collect();
        assert_eq!(names, ["notes (1).txt", "notes (2).txt", "notes.txt"]);
    }

    #[test]
    fn replace_soft_deletes_and_rollback_revives() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("doc.txt", b"old")]),
            &CancelToken::new(),
        )
        .unwrap();

        // Replace succeeds: the incumbent is trashed, the new row active.
        ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            IngestRequest {
                parent: None,
                items: vec![leaf("doc.txt", b"new")],
                duplicate_action: DuplicateAction::Replace,
            },
            &CancelToken::new(),
        )
        .unwrap();
        let listing = ns.list_contents(None, false).unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(account.used_bytes, 6); // trash is still billable

        // A failing Replace batch revives the incumbent it trashed: the
        // first leaf replaces "doc.txt", the second has an illegal name
        // and sinks the batch after the replacement already happened.
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            IngestRequest {
                parent: None,
                items: vec![leaf("doc.txt", b"newer"), leaf("bad/name.txt", b"x")],
                duplicate_action: DuplicateAction::Replace,
            },
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        let files = ns.list_contents(None, false).unwrap().files;
        assert_eq!(files.len(), 1);
        // The surviving row is the pre-batch incumbent, frame intact.
        let got = blobs
            .get(account.id, &account.cipher_key, &files[0].storage_key)
            .unwrap();
        assert_eq!(got, b"new");
        assert_eq!(account.used_bytes, 6);
    }

    #[test]
    fn cancellation_unwinds_like_failure() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("a.txt", b"hello")]),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert_eq!(account.used_bytes, 0);
        assert!(ns.list_contents(None, false).unwrap().files.is_empty());
    }

    #[test]
    fn previews_are_recorded_for_text_files() {
        let (_dir, config, blobs, mut account, mut ns) = rig(StoreConfig::default());
        let report = ingest(
            &config,
            &blobs,
            &mut account,
            &mut ns,
            request(vec![leaf("notes.txt", b"preview me"), leaf("blob.exe", b"MZ....")]),
            &CancelToken::new(),
        )
        .unwrap();
        let by_name = |n: &str| report.files.iter().find(|f| f.display_name == n).unwrap();
        assert!(by_name("notes.txt").has_preview);
        assert!(!by_name("blob.exe").has_preview);
        let preview = blobs
            .preview(
                account.id,
                &account.cipher_key,
                &by_name("notes.txt").storage_key,
            )
            .unwrap();
        assert_eq!(preview.as_deref(), Some(&b"preview me"[..]));
    }
}
