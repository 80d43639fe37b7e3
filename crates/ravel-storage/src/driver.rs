#![forbid(unsafe_code)]

//! Generic `Resource<D>` and `Driver` trait.
//!
//! `Driver` abstracts backend-specific byte I/O (mmap file, in-memory buffer).
//! `Resource<D>` owns the store semantics (range checks, hole vs. tail
//! deletes, lifecycle) and serializes every operation through one lock.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use ravel_platform::Mutex;

use crate::{
    StorageError, StorageResult,
    resource::{ResourceExt, ResourceStatus},
};

/// Backend-specific storage operations.
///
/// Drivers keep their physical length equal to the logical size of the
/// store: `len()` is the size, and bytes below it that were never written
/// must read as zero. Range validation happens in [`Resource<D>`] before the
/// driver is called.
pub trait Driver: Send + 'static {
    /// Configuration needed to open/create a driver instance.
    type Options: Send;

    /// Open or create the backing storage.
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be opened or created.
    fn open(opts: Self::Options) -> StorageResult<Self>
    where
        Self: Sized;

    /// Physical length, which is also the logical size.
    fn len(&self) -> u64;

    /// Fill `buf` from `offset`. The range is within `len()`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying storage read fails.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Write `data` at `offset`, growing the storage when it ends past `len()`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage cannot grow or the write fails.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Overwrite `len` bytes at `offset` with zeros. The range is within `len()`.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn zero_range(&mut self, offset: u64, len: u64) -> StorageResult<()>;

    /// Grow (zero-filled) or shrink the storage to exactly `len`.
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be resized.
    fn set_len(&mut self, len: u64) -> StorageResult<()>;

    /// Filesystem path, if any.
    fn path(&self) -> Option<&Path>;

    /// Remove the backing storage.
    ///
    /// # Errors
    ///
    /// Returns error if the backing file exists and cannot be removed.
    fn remove(self) -> StorageResult<()>;
}

enum Slot<D> {
    Active(D),
    Released,
    Destroyed,
}

struct Inner<D: Driver> {
    path: Option<PathBuf>,
    slot: Mutex<Slot<D>>,
}

/// Generic storage resource parameterized by backend driver.
///
/// Clones share one driver. Use via type aliases:
/// - [`MmapResource`](crate::MmapResource) = `Resource<MmapDriver>`
/// - [`MemResource`](crate::MemResource) = `Resource<MemDriver>`
pub struct Resource<D: Driver> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for Resource<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver + Debug> Debug for Resource<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot.lock();
        let mut s = f.debug_struct("Resource");
        match &*slot {
            Slot::Active(driver) => s.field("driver", driver),
            Slot::Released => s.field("status", &ResourceStatus::Released),
            Slot::Destroyed => s.field("status", &ResourceStatus::Destroyed),
        };
        s.finish()
    }
}

impl<D: Driver> Resource<D> {
    /// Create a resource from driver options.
    ///
    /// # Errors
    ///
    /// Returns error if the driver cannot be opened (e.g. file I/O failure).
    pub fn open(opts: D::Options) -> StorageResult<Self> {
        D::open(opts).map(Self::from_driver)
    }

    pub(crate) fn from_driver(driver: D) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: driver.path().map(Path::to_path_buf),
                slot: Mutex::new(Slot::Active(driver)),
            }),
        }
    }

    /// Whether both handles refer to the same shared resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the active driver under the resource lock.
    fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> StorageResult<R>) -> StorageResult<R> {
        let mut slot = self.inner.slot.lock();
        match &mut *slot {
            Slot::Active(driver) => f(driver),
            Slot::Released => Err(StorageError::Closed),
            Slot::Destroyed => Err(StorageError::Destroyed),
        }
    }
}

impl<D: Driver> ResourceExt for Resource<D> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        self.with_driver(|driver| {
            if len == 0 {
                return Ok(Bytes::new());
            }

            let size = driver.len();
            let len64 = len as u64;
            let end = offset
                .checked_add(len64)
                .ok_or(StorageError::InvalidRange {
                    start: offset,
                    end: u64::MAX,
                })?;
            if end > size {
                return Err(StorageError::RangeNotSatisfiable {
                    offset,
                    len: len64,
                    size,
                });
            }

            let mut buf = vec![0u8; len];
            driver.read_at(offset, &mut buf)?;
            Ok(Bytes::from(buf))
        })
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return self.with_driver(|_| Ok(()));
        }

        offset
            .checked_add(data.len() as u64)
            .ok_or(StorageError::InvalidRange {
                start: offset,
                end: u64::MAX,
            })?;

        self.with_driver(|driver| driver.write_at(offset, data))
    }

    fn del(&self, offset: u64, len: u64) -> StorageResult<()> {
        self.with_driver(|driver| {
            let size = driver.len();
            if len == 0 || offset >= size {
                return Ok(());
            }

            if offset.saturating_add(len) >= size {
                tracing::trace!(offset, size, "del reaches end, truncating");
                driver.set_len(offset)
            } else {
                driver.zero_range(offset, len)
            }
        })
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        self.with_driver(|driver| {
            if driver.len() == len {
                return Ok(());
            }
            driver.set_len(len)
        })
    }

    fn len(&self) -> StorageResult<u64> {
        self.with_driver(|driver| Ok(driver.len()))
    }

    fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    fn status(&self) -> ResourceStatus {
        match &*self.inner.slot.lock() {
            Slot::Active(_) => ResourceStatus::Active,
            Slot::Released => ResourceStatus::Released,
            Slot::Destroyed => ResourceStatus::Destroyed,
        }
    }

    fn release(&self) -> StorageResult<()> {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Active(_)) {
            // Dropping the driver unmaps and closes the descriptor.
            *slot = Slot::Released;
        }
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        let mut slot = self.inner.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Destroyed) {
            Slot::Active(driver) => driver.remove(),
            Slot::Released => match self.inner.path {
                Some(ref path) => remove_file_if_exists(path),
                None => Ok(()),
            },
            Slot::Destroyed => Ok(()),
        }
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> StorageResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
