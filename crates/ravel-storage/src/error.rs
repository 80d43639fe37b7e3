#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type used by `ravel-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by stores and their backing resources.
///
/// Every failing operation reports one of these to its caller. A failure is
/// local to the call: the handle stays usable and earlier writes stay intact.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A read asked for bytes past the current size. No partial data is returned.
    #[error("range not satisfiable: {len} bytes at offset {offset} exceed size {size}")]
    RangeNotSatisfiable { offset: u64, len: u64, size: u64 },

    /// Malformed configuration or name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Offset arithmetic overflowed `u64`.
    #[error("invalid range: start {start} >= end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("store is not writable")]
    NotWritable,

    #[error("store is not readable")]
    NotReadable,

    /// The backing resource does not exist and the handle may not create it.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mmap error: {0}")]
    Mmap(#[from] mmap_io::MmapIoError),

    #[error("store is closed")]
    Closed,

    #[error("store is destroyed")]
    Destroyed,

    #[error("operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
