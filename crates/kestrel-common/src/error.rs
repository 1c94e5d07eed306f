//! Error types for Kestrel.

use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in Kestrel operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("File already exists: {path}")]
    FileExists { path: String },

    // Buffer pool / pager errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not found: {page_no}")]
    PageNotFound { page_no: u32 },

    #[error("Page {page_no} is not pinned")]
    PageNotPinned { page_no: u32 },

    #[error("Page {page_no} is still pinned")]
    PagePinned { page_no: u32 },

    // Record file errors
    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("End of relation")]
    EndOfRelation,

    // Index errors
    #[error("Index metadata does not match: {index_name}")]
    BadIndexInfo { index_name: String },

    #[error("Invalid scan operators: low must be GT/GTE, high must be LT/LTE")]
    BadOperator,

    #[error("Invalid scan range: low {low} exceeds high {high}")]
    BadRange { low: i32, high: i32 },

    #[error("No key in the index satisfies the scan criteria")]
    NoSuchKey,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,
}
