use clap::{Parser, Subcommand};
use coffre::ingest::{ArchiveEntry, DuplicateAction, IngestRequest, UploadItem};
use coffre::namespace::{Item, ItemId, ItemKind, SearchFilter};
use coffre::{CancelToken, MediaCategory, Store, StoreError};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "coffre", version, about = "Encrypted per-account file store CLI")]
struct Cli {
    /// Store root directory (holds catalog.json, uploads/, avatars/)
    #[arg(long, default_value = ".coffre")]
    root: PathBuf,
    /// Account name to operate as (not needed for `account` commands)
    #[arg(long, global = true)]
    r#as: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise the store root (directories and catalog)
    Init,
    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Create a folder path (missing parents are created too)
    Mkdir { path: String },
    /// Upload files and directories
    Upload {
        /// Local files or directories; a directory is materialised with
        /// its structure, junk entries filtered out
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Target folder path, e.g. /docs
        #[arg(long, default_value = "/")]
        to: String,
        /// error (default), replace, keep-both
        #[arg(long, default_value = "error")]
        on_duplicate: String,
    },
    /// List a folder (default: the account root)
    Ls {
        path: Option<String>,
        /// List the trash instead
        #[arg(long)]
        trash: bool,
    },
    /// Download a file's plaintext
    Download {
        path: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a file to stdout
    View {
        path: String,
        /// Prefer the preview sidecar when one exists
        #[arg(long)]
        preview: bool,
    },
    /// Rename a file or folder
    Rename { path: String, new_name: String },
    /// Move a file or folder under a new parent ("/" = root)
    Mv { path: String, new_parent: String },
    /// Move a file or folder to the trash
    Rm { path: String },
    /// Restore a trashed item by id (see `ls --trash`)
    Restore { id: ItemId },
    /// Permanently delete an item by id
    Purge { id: ItemId },
    /// Permanently delete everything in the trash
    EmptyTrash,
    /// Pin or unpin an item
    Pin {
        path: String,
        #[arg(long)]
        remove: bool,
    },
    /// List pinned items
    Pins {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// List recently updated files
    Recent,
    /// Search active items by name
    Search {
        query: String,
        /// file | folder
        #[arg(long)]
        kind: Option<String>,
        /// image | document | video | audio | archive | other
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        pinned: bool,
    },
    /// Set the account avatar from an image file
    Avatar { input: PathBuf },
    /// Show account usage
    Info,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create an account with the default quota
    Add { name: String },
    /// List accounts
    List,
    /// Set an account's quota in bytes
    Quota { name: String, bytes: u64 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut store = Store::open(&cli.root)?;

    // ── Store setup (no --as needed) ─────────────────────────────────────
    if let Commands::Init = &cli.command {
        store.init()?;
        println!("Initialised store at {}", cli.root.display());
        return Ok(());
    }

    // ── Account management (no --as needed) ──────────────────────────────
    if let Commands::Account { command } = &cli.command {
        match command {
            AccountCommands::Add { name } => {
                let id = store.create_account(name)?;
                println!("Created account {name} ({id})");
            }
            AccountCommands::List => {
                println!("{:<20} {:>14} {:>14}  Id", "Name", "Used", "Quota");
                for a in store.accounts() {
                    println!("{:<20} {:>14} {:>14}  {}", a.name, a.used_bytes, a.quota_bytes, a.id);
                }
            }
            AccountCommands::Quota { name, bytes } => {
                let id = owner_by_name(&store, name)?;
                store.set_quota(id, *bytes)?;
                println!("Quota of {name} set to {bytes} B");
            }
        }
        return Ok(());
    }

    let owner = match &cli.r#as {
        Some(name) => owner_by_name(&store, name)?,
        None => return Err("pass --as <account>; create one with `coffre account add`".into()),
    };
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Init | Commands::Account { .. } => unreachable!("handled above"),

        // ── Namespace ────────────────────────────────────────────────────
        Commands::Mkdir { path } => {
            let mut parent: Option<ItemId> = None;
            let mut acc = String::new();
            for name in path.split('/').filter(|c| !c.is_empty()) {
                acc.push('/');
                acc.push_str(name);
                parent = Some(match store.resolve_path(owner, &acc)? {
                    Some(Item::Folder(f)) => f.id,
                    Some(Item::File(_)) => return Err(format!("{acc} is a file").into()),
                    None => store.create_folder(owner, parent, name)?,
                });
            }
            println!("Created {path}");
        }

        Commands::Upload { input, to, on_duplicate } => {
            let parent = folder_id_of(&store, owner, &to)?;
            let duplicate_action = DuplicateAction::from_name(&on_duplicate)
                .ok_or_else(|| format!("unknown duplicate action '{on_duplicate}'"))?;
            let mut items = Vec::new();
            for path in &input {
                if path.is_dir() {
                    items.push(UploadItem::Archive {
                        name: file_name(path),
                        entries: walk_dir(path)?,
                    });
                } else {
                    items.push(UploadItem::File {
                        name: file_name(path),
                        data: std::fs::read(path)?,
                    });
                }
            }
            let report =
                store.upload_batch(owner, IngestRequest { parent, items, duplicate_action }, &cancel)?;
            for f in &report.files {
                println!("  stored  {:<28} {:>10} B  {}", f.display_name, f.byte_size, f.storage_key);
            }
            println!(
                "Uploaded {} file(s), {} new folder(s), {} B",
                report.files.len(),
                report.folders_created,
                report.total_bytes
            );
        }

        Commands::Ls { path, trash } => {
            if trash {
                let (folders, files) = store.list_trash(owner)?;
                println!("── Trash ───────────────────────────────────────────────");
                for f in &folders {
                    println!("  [{:>4}] {}/  (deleted {})", f.id, f.path, stamp(f.deleted_at));
                }
                for f in &files {
                    println!("  [{:>4}] {}  (deleted {})", f.id, f.path, stamp(f.deleted_at));
                }
                return Ok(());
            }
            let parent = folder_id_of(&store, owner, path.as_deref().unwrap_or("/"))?;
            let listing = store.list_contents(owner, parent)?;
            let crumbs: Vec<&str> = listing.breadcrumbs.iter().map(|s| s.name.as_str()).collect();
            println!("/{}", crumbs.join("/"));
            for f in &listing.folders {
                println!("  [{:>4}] {}/{}", f.id, f.name, if f.pinned { "  *" } else { "" });
            }
            for f in &listing.files {
                println!(
                    "  [{:>4}] {:<28} {:>10} B{}",
                    f.id,
                    f.display_name(),
                    f.size,
                    if f.pinned { "  *" } else { "" }
                );
            }
        }

        Commands::Download { path, output } => {
            let file = file_of(&store, owner, &path)?;
            let data = store.download_file(owner, file)?;
            std::fs::write(&output, &data)?;
            println!("Wrote {} B to {}", data.len(), output.display());
        }

        Commands::View { path, preview } => {
            let file = file_of(&store, owner, &path)?;
            let data = store.view_file(owner, file, preview)?;
            print!("{}", String::from_utf8_lossy(&data));
        }

        Commands::Rename { path, new_name } => {
            match resolve(&store, owner, &path)? {
                Item::Folder(f) => store.rename_folder(owner, f.id, &new_name)?,
                Item::File(f) => store.rename_file(owner, f.id, &new_name)?,
            }
            println!("Renamed {path} → {new_name}");
        }

        Commands::Mv { path, new_parent } => {
            let target = folder_id_of(&store, owner, &new_parent)?;
            match resolve(&store, owner, &path)? {
                Item::Folder(f) => store.move_folder(owner, f.id, target)?,
                Item::File(f) => store.move_file(owner, f.id, target)?,
            }
            println!("Moved {path} → {new_parent}");
        }

        Commands::Rm { path } => {
            match resolve(&store, owner, &path)? {
                Item::Folder(f) => store.soft_delete_folder(owner, f.id)?,
                Item::File(f) => store.soft_delete_file(owner, f.id)?,
            }
            println!("Moved {path} to trash");
        }

        Commands::Restore { id } => {
            match store.restore_file(owner, id) {
                Err(StoreError::NotFound(_)) => store.restore_folder(owner, id)?,
                other => other?,
            }
            println!("Restored item {id}");
        }

        Commands::Purge { id } => {
            let freed = match store.permanent_delete_file(owner, id) {
                Err(StoreError::NotFound(_)) => store.permanent_delete_folder(owner, id)?,
                other => other?,
            };
            println!("Deleted item {id}, freed {freed} B");
        }

        Commands::EmptyTrash => {
            let freed = store.empty_trash(owner, &cancel)?;
            println!("Trash emptied, freed {freed} B");
        }

        Commands::Pin { path, remove } => {
            match resolve(&store, owner, &path)? {
                Item::Folder(f) => store.set_folder_pinned(owner, f.id, !remove)?,
                Item::File(f) => store.set_file_pinned(owner, f.id, !remove)?,
            }
            println!("{} {path}", if remove { "Unpinned" } else { "Pinned" });
        }

        Commands::Pins { offset, limit } => {
            for item in store.list_pinned(owner, offset, limit)? {
                println!("  [{:>4}] {}", item.id(), item.path());
            }
        }

        Commands::Recent => {
            for f in store.list_recent(owner, 20)? {
                println!("  [{:>4}] {:<40} {}", f.id, f.path, f.updated_at.format("%Y-%m-%d %H:%M"));
            }
        }

        Commands::Search { query, kind, category, pinned } => {
            let filter = SearchFilter {
                kind: match kind.as_deref() {
                    Some("file") => Some(ItemKind::File),
                    Some("folder") => Some(ItemKind::Folder),
                    Some(other) => return Err(format!("unknown kind '{other}'").into()),
                    None => None,
                },
                category: match category {
                    Some(c) => Some(
                        MediaCategory::from_name(&c).ok_or_else(|| format!("unknown category '{c}'"))?,
                    ),
                    None => None,
                },
                pinned: pinned.then_some(true),
                ..Default::default()
            };
            let hits = store.search(owner, &query, &filter)?;
            println!("{} hit(s):", hits.len());
            for item in hits {
                println!("  [{:>4}] {}", item.id(), item.path());
            }
        }

        Commands::Avatar { input } => {
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = store.set_avatar(owner, &ext, &std::fs::read(&input)?)?;
            println!("Avatar set: {}", path.display());
        }

        Commands::Info => {
            let account = store.account(owner)?;
            println!("── Account ─────────────────────────────────────────────");
            println!("  Name        {}", account.name);
            println!("  Id          {}", account.id);
            println!("  Role        {:?}", account.role);
            println!("  Used        {} B ({:.2} MiB)", account.used_bytes, mib(account.used_bytes));
            println!("  Quota       {} B ({:.2} MiB)", account.quota_bytes, mib(account.quota_bytes));
            println!("  Available   {} B", account.available_bytes());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn owner_by_name(store: &Store, name: &str) -> Result<Uuid, Box<dyn std::error::Error>> {
    store
        .find_account_by_name(name)
        .map(|a| a.id)
        .ok_or_else(|| format!("no account named '{name}'").into())
}

fn resolve(store: &Store, owner: Uuid, path: &str) -> Result<Item, Box<dyn std::error::Error>> {
    store
        .resolve_path(owner, path)?
        .ok_or_else(|| format!("no such item: {path}").into())
}

/// Folder id for a path; "/" is the account root (`None`).
fn folder_id_of(
    store: &Store,
    owner: Uuid,
    path: &str,
) -> Result<Option<ItemId>, Box<dyn std::error::Error>> {
    if path.split('/').all(|c| c.is_empty()) {
        return Ok(None);
    }
    match resolve(store, owner, path)? {
        Item::Folder(f) => Ok(Some(f.id)),
        Item::File(_) => Err(format!("{path} is a file, not a folder").into()),
    }
}

fn file_of(store: &Store, owner: Uuid, path: &str) -> Result<ItemId, Box<dyn std::error::Error>> {
    match resolve(store, owner, path)? {
        Item::File(f) => Ok(f.id),
        Item::Folder(_) => Err(format!("{path} is a folder, not a file").into()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().into_owned()
}

/// Flatten a local directory into archive entries with `/`-relative paths.
fn walk_dir(root: &Path) -> Result<Vec<ArchiveEntry>, Box<dyn std::error::Error>> {
    fn visit(
        dir: &Path,
        prefix: &str,
        out: &mut Vec<ArchiveEntry>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
            if entry.file_type()?.is_dir() {
                out.push(ArchiveEntry { path: rel.clone(), data: None });
                visit(&entry.path(), &rel, out)?;
            } else {
                out.push(ArchiveEntry { path: rel, data: Some(std::fs::read(entry.path())?) });
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    visit(root, "", &mut out)?;
    Ok(out)
}

fn stamp(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default()
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1048576.0
}
