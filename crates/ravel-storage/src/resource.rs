#![forbid(unsafe_code)]

use std::path::Path;

use bytes::Bytes;

use crate::StorageResult;

/// Lifecycle of a shared backing resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Driver is open; reads and writes reach the backing bytes.
    Active,
    /// Last handle closed; the driver (mapping, descriptor) was dropped.
    Released,
    /// Backing bytes were removed.
    Destroyed,
}

/// Snapshot returned by `stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStat {
    /// Logical size in bytes.
    pub size: u64,
}

/// Synchronous random-access contract shared by every backing resource.
///
/// Each call runs atomically with respect to the others on the same
/// resource, so overlapping writes resolve in completion order.
pub trait ResourceExt: Send + Sync + 'static {
    /// Read exactly `len` bytes at `offset`.
    ///
    /// Bytes below the size that were never written read as zero. A range
    /// reaching past the size fails with
    /// [`StorageError::RangeNotSatisfiable`](crate::StorageError::RangeNotSatisfiable);
    /// `len == 0` always succeeds.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes>;

    /// Write `data` at `offset`, growing the size to cover it.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Delete `len` bytes at `offset`.
    ///
    /// A range ending before the size becomes a zero-filled hole. A range
    /// reaching the size cuts the tail, so the size becomes `offset`.
    /// `offset + len` saturates; deleting at or past the size is a no-op.
    fn del(&self, offset: u64, len: u64) -> StorageResult<()>;

    /// Set the size to exactly `len`.
    fn truncate(&self, len: u64) -> StorageResult<()>;

    /// Current logical size.
    fn len(&self) -> StorageResult<u64>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn stat(&self) -> StorageResult<StoreStat> {
        Ok(StoreStat { size: self.len()? })
    }

    /// Backing file, if any.
    fn path(&self) -> Option<&Path>;

    fn status(&self) -> ResourceStatus;

    /// Drop the driver but keep the backing bytes.
    fn release(&self) -> StorageResult<()>;

    /// Drop the driver and remove the backing bytes.
    fn destroy(&self) -> StorageResult<()>;
}
