//! Error taxonomy — propagated to callers unchanged.
//!
//! # Propagation rules
//! - Input and authorization errors surface directly.
//! - Integrity failures (bad ciphertext length, bad padding, truncated bit
//!   stream) surface as [`StoreError::CorruptFrame`]; the underlying cause
//!   is logged in full internally and never shown to the caller.
//! - Transient errors are never retried inside the core; the caller decides.
//! - Any failure after a partial write triggers the ingest/namespace
//!   rollback discipline — there is no best-effort partial success.

use thiserror::Error;

/// Result alias used across the crate.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    // ── Input ────────────────────────────────────────────────────────────
    #[error("\"{0}\" already exists here")]
    NameConflict(String),
    #[error("Cannot move a folder into its own descendant")]
    CycleDetected,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported media type \"{0}\"")]
    UnsupportedMediaType(String),

    // ── Authorization ────────────────────────────────────────────────────
    #[error("Unauthenticated")]
    Unauthenticated,
    #[error("Forbidden")]
    Forbidden,

    // ── Resources ────────────────────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Quota exceeded: {needed} B needed, {available} B available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("Batch size {total} B exceeds the {limit} B limit")]
    BatchSizeExceeded { total: u64, limit: u64 },
    #[error("Batch file count {count} exceeds the {limit}-file limit")]
    BatchFileCountExceeded { count: usize, limit: usize },
    #[error("Folder \"{folder}\" would exceed the {limit}-child limit")]
    FolderFileCountExceeded { folder: String, limit: usize },

    // ── Integrity ────────────────────────────────────────────────────────
    /// A stored frame failed to decode.  The specific cause (invalid
    /// length, invalid padding, truncated bit stream) is logged internally.
    #[error("Stored frame is corrupt")]
    CorruptFrame,

    // ── Transient ────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Catalog unavailable: {0}")]
    DatabaseUnavailable(String),

    // ── Cancellation ─────────────────────────────────────────────────────
    /// The operation was cancelled at an I/O boundary and rolled back.
    #[error("Operation cancelled")]
    Cancelled,
}
