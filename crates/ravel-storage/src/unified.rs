#![forbid(unsafe_code)]

//! Unified storage resource: disk (mmap) or memory backend.

use std::path::Path;

use bytes::Bytes;

use crate::{
    MemResource, MmapResource, StorageResult,
    resource::{ResourceExt, ResourceStatus},
};

/// Unified resource: disk (mmap) or memory backend.
///
/// Dispatches all [`ResourceExt`] operations to the inner variant.
/// Use [`From<MmapResource>`] or [`From<MemResource>`] for construction.
#[derive(Clone, Debug)]
pub enum StorageResource {
    /// File-backed mmap resource.
    Mmap(MmapResource),
    /// In-memory resource.
    Mem(MemResource),
}

impl StorageResource {
    /// Whether both values refer to the same shared resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Mmap(a), Self::Mmap(b)) => a.ptr_eq(b),
            (Self::Mem(a), Self::Mem(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<MmapResource> for StorageResource {
    fn from(r: MmapResource) -> Self {
        Self::Mmap(r)
    }
}

impl From<MemResource> for StorageResource {
    fn from(r: MemResource) -> Self {
        Self::Mem(r)
    }
}

impl ResourceExt for StorageResource {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        match self {
            Self::Mmap(r) => r.read_at(offset, len),
            Self::Mem(r) => r.read_at(offset, len),
        }
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        match self {
            Self::Mmap(r) => r.write_at(offset, data),
            Self::Mem(r) => r.write_at(offset, data),
        }
    }

    fn del(&self, offset: u64, len: u64) -> StorageResult<()> {
        match self {
            Self::Mmap(r) => r.del(offset, len),
            Self::Mem(r) => r.del(offset, len),
        }
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        match self {
            Self::Mmap(r) => r.truncate(len),
            Self::Mem(r) => r.truncate(len),
        }
    }

    fn len(&self) -> StorageResult<u64> {
        match self {
            Self::Mmap(r) => r.len(),
            Self::Mem(r) => r.len(),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Self::Mmap(r) => r.path(),
            Self::Mem(r) => r.path(),
        }
    }

    fn status(&self) -> ResourceStatus {
        match self {
            Self::Mmap(r) => r.status(),
            Self::Mem(r) => r.status(),
        }
    }

    fn release(&self) -> StorageResult<()> {
        match self {
            Self::Mmap(r) => r.release(),
            Self::Mem(r) => r.release(),
        }
    }

    fn destroy(&self) -> StorageResult<()> {
        match self {
            Self::Mmap(r) => r.destroy(),
            Self::Mem(r) => r.destroy(),
        }
    }
}
