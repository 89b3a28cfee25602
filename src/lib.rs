//! # coffre — encrypted, compressed per-account file store
//!
//! The core of a personal file-storage backend: a content store of
//! encrypted, compressed frames plus the namespace engine that projects a
//! virtual folder tree over it.
//!
//! Format guarantees (frozen):
//! - Every frame on disk is `AES-128(PKCS#7(huffman-frame))`, block by
//!   block, no IV — a frame decodes with nothing but the account key
//! - The Huffman frame is self-describing: big-endian original length,
//!   UTF-8 JSON `[[byte, count], …]` frequency table, 0xFF 0xFF sentinel,
//!   bit stream; verbatim pass-through and the single-byte short frame
//!   are both valid shapes and every decoder tolerates them
//! - Storage keys are content-opaque (`file-<32 hex>.<ext>`); the key is
//!   the only handle from a record to its frame
//! - Writes are temp-then-rename in the destination directory; a row is
//!   committed only after its frame's rename completes
//! - Ingest batches are all-or-none: any failure or cancellation unwinds
//!   every frame, row, and soft-delete of the batch, and quota moves only
//!   at commit
//! - Trash is billable: `used_bytes` changes on ingest commit and
//!   permanent delete, never on soft-delete or restore

pub mod account;
pub mod blob;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod media;
pub mod namespace;
pub mod store;

// Flat re-exports for the most common types.
pub use account::{Account, Role};
pub use blob::{BlobStore, PutReceipt};
pub use cancel::CancelToken;
pub use codec::{open, seal, CipherError, CodecError};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use ingest::{ArchiveEntry, DuplicateAction, IngestReport, IngestRequest, UploadItem};
pub use media::MediaCategory;
pub use namespace::{
    FileRecord, FolderListing, FolderRecord, Item, ItemId, ItemKind, Namespace, PathSegment,
    SearchFilter,
};
pub use store::Store;
