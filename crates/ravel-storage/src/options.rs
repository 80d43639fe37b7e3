#![forbid(unsafe_code)]

//! Configuration for roots and stores.

use std::path::PathBuf;

use bytes::Bytes;
use ravel_platform::ThreadPool;
use tokio_util::sync::CancellationToken;

use crate::{StorageError, StorageResult};

/// Per-store options, applied once when the handle opens.
///
/// Open applies them in a fixed order: `truncate`, then `size`, then
/// `content`.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Discard all existing content (size becomes 0).
    pub truncate: bool,
    /// Make the size exactly this value, zero-extending or cutting the tail.
    /// Negative values are rejected with [`StorageError::InvalidArgument`].
    pub size: Option<i64>,
    /// Bytes written at offset 0 before the store is considered ready.
    pub content: Option<Bytes>,
    /// Permit `write`/`del`/`truncate`, and creation of a missing store.
    pub writable: bool,
    /// Permit `read`.
    pub readable: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            truncate: false,
            size: None,
            content: None,
            writable: true,
            readable: true,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a handle that may only read and stat.
    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Self::default()
        }
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    /// Check field values and combinations, returning the declared size.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] for a negative size, or when a
    /// mutating option is combined with `writable = false`.
    pub fn validate(&self) -> StorageResult<Option<u64>> {
        let size = match self.size {
            Some(size) => Some(u64::try_from(size).map_err(|_| {
                StorageError::invalid(format!("size must be non-negative, got {size}"))
            })?),
            None => None,
        };

        if !self.writable {
            if self.truncate {
                return Err(StorageError::invalid("truncate requires a writable store"));
            }
            if size.is_some() {
                return Err(StorageError::invalid("size requires a writable store"));
            }
            if self.content.is_some() {
                return Err(StorageError::invalid("content requires a writable store"));
            }
        }

        Ok(size)
    }
}

/// Where a root keeps the bytes of its stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// One file per store under `root_dir`, accessed through a memory map.
    Disk { root_dir: PathBuf },
    /// One buffer per store, owned by the root. Survives close, not process exit.
    Memory,
}

/// Options for a [`StorageRoot`](crate::StorageRoot).
#[derive(Clone, Debug)]
pub struct RootOptions {
    pub backend: Backend,
    /// Run store operations on this pool. `None` runs them inline on the
    /// calling task.
    pub pool: Option<ThreadPool>,
    /// Once cancelled, every data operation fails with
    /// [`StorageError::Cancelled`]. Close and destroy keep working.
    pub cancel: Option<CancellationToken>,
    /// On destroy, also remove parent directories left empty, up to the root.
    pub rmdir: bool,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self::disk(std::env::temp_dir().join("ravel"))
    }
}

impl RootOptions {
    pub fn disk<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            backend: Backend::Disk {
                root_dir: root_dir.into(),
            },
            pool: None,
            cancel: None,
            rmdir: false,
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            pool: None,
            cancel: None,
            rmdir: false,
        }
    }

    pub fn with_pool(mut self, pool: ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_rmdir(mut self, rmdir: bool) -> Self {
        self.rmdir = rmdir;
        self
    }
}
