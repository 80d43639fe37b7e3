#![forbid(unsafe_code)]

//! In-memory storage driver.
//!
//! [`MemDriver`] keeps the store in a `Vec<u8>` whose length is the logical
//! size. It backs roots configured with [`Backend::Memory`](crate::Backend::Memory)
//! and is handy in tests where touching the filesystem is unwanted.

use std::{io, path::Path};

use crate::{
    StorageError, StorageResult,
    driver::{Driver, Resource},
};

/// Options for opening a [`MemResource`].
#[derive(Clone, Debug, Default)]
pub struct MemOptions {
    /// Bytes to reserve up front.
    pub capacity: usize,
}

/// In-memory storage driver.
#[derive(Default)]
pub struct MemDriver {
    buf: Vec<u8>,
}

impl MemDriver {
    /// Zero-extend the buffer to `len` bytes without aborting on allocation failure.
    fn grow_to(&mut self, len: u64) -> StorageResult<()> {
        let len = usize::try_from(len).map_err(|_| too_large(len))?;
        if len <= self.buf.len() {
            return Ok(());
        }
        self.buf
            .try_reserve_exact(len - self.buf.len())
            .map_err(|e| {
                tracing::warn!(len, error = %e, "memory store cannot grow");
                too_large(len as u64)
            })?;
        self.buf.resize(len, 0);
        Ok(())
    }
}

fn too_large(len: u64) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::OutOfMemory,
        format!("memory store cannot hold {len} bytes"),
    ))
}

impl std::fmt::Debug for MemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDriver")
            .field("len", &self.buf.len())
            .finish()
    }
}

#[expect(clippy::cast_possible_truncation)] // offsets are bounded by the buffer length
impl Driver for MemDriver {
    type Options = MemOptions;

    fn open(opts: MemOptions) -> StorageResult<Self> {
        Ok(Self {
            buf: Vec::with_capacity(opts.capacity),
        })
    }

    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let start = offset as usize;
        buf.copy_from_slice(&self.buf[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.grow_to(offset + data.len() as u64)?;
        let start = offset as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn zero_range(&mut self, offset: u64, len: u64) -> StorageResult<()> {
        let start = offset as usize;
        let end = start + len as usize;
        self.buf[start..end].fill(0);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> StorageResult<()> {
        if len > self.len() {
            return self.grow_to(len);
        }
        let len = len as usize;
        self.buf.truncate(len);
        if len < self.buf.capacity() / 4 {
            self.buf.shrink_to(len);
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn remove(self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-memory storage resource.
///
/// Type alias for [`Resource<MemDriver>`].
pub type MemResource = Resource<MemDriver>;

impl MemResource {
    /// Create a new empty in-memory resource.
    pub fn new() -> Self {
        Self::from_driver(MemDriver::default())
    }

    /// Create a resource pre-filled with `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_driver(MemDriver { buf: data.to_vec() })
    }
}

impl Default for MemResource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::*;

    use super::*;
    use crate::{
        StorageError,
        resource::{ResourceExt, ResourceStatus},
    };

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_create_new_resource() {
        let res = MemResource::new();
        assert_eq!(res.len().unwrap(), 0);
        assert_eq!(res.status(), ResourceStatus::Active);
        assert_eq!(res.path(), None);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_open_with_options() {
        let res: MemResource = Resource::open(MemOptions { capacity: 1024 }).unwrap();
        assert!(res.is_empty().unwrap());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_from_bytes() {
        let res = MemResource::from_bytes(b"preloaded");
        assert_eq!(res.len().unwrap(), 9);
        assert_eq!(&res.read_at(0, 9).unwrap()[..], b"preloaded");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_sparse_write() {
        let res = MemResource::new();

        res.write_at(100, b"sparse").unwrap();
        assert_eq!(res.len().unwrap(), 106);
        assert_eq!(&res.read_at(100, 6).unwrap()[..], b"sparse");
        assert_eq!(&res.read_at(0, 4).unwrap()[..], &[0, 0, 0, 0]);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_overlapping_writes_last_wins() {
        let res = MemResource::new();
        res.write_at(0, b"Hello World!").unwrap();
        res.write_at(6, b"Ravel!").unwrap();
        assert_eq!(&res.read_at(0, 12).unwrap()[..], b"Hello Ravel!");
    }

    #[rstest]
    #[case(0, 40, 100)] // hole at the front
    #[case(10, 89, 100)] // hole ending one byte short of the end
    #[case(50, 50, 50)] // reaches the end exactly
    #[case(50, 60, 50)] // reaches past the end
    #[case(0, u64::MAX, 0)] // everything
    #[case(100, 10, 100)] // starts at the end: no-op
    #[case(150, 10, 100)] // starts past the end: no-op
    #[case(20, 0, 100)] // empty range: no-op
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_del_size(#[case] offset: u64, #[case] len: u64, #[case] expected: u64) {
        let res = MemResource::from_bytes(&[0xFF; 100]);
        res.del(offset, len).unwrap();
        assert_eq!(res.len().unwrap(), expected);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_del_hole_reads_zero() {
        let res = MemResource::from_bytes(&[0xFF; 100]);
        res.del(10, 20).unwrap();

        let data = res.read_at(0, 100).unwrap();
        assert!(data[..10].iter().all(|&b| b == 0xFF));
        assert!(data[10..30].iter().all(|&b| b == 0));
        assert!(data[30..].iter().all(|&b| b == 0xFF));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_truncate_then_grow_zero_fills() {
        let res = MemResource::from_bytes(b"abcdef");
        res.truncate(2).unwrap();
        res.truncate(6).unwrap();
        assert_eq!(&res.read_at(0, 6).unwrap()[..], b"ab\0\0\0\0");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_read_range_errors() {
        let res = MemResource::new();
        assert!(res.read_at(0, 0).unwrap().is_empty());
        assert!(res.read_at(u64::MAX, 0).unwrap().is_empty());
        assert!(matches!(
            res.read_at(0, 1),
            Err(StorageError::RangeNotSatisfiable { size: 0, .. })
        ));
        assert!(matches!(
            res.read_at(u64::MAX, 2),
            Err(StorageError::InvalidRange { .. })
        ));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_write_overflow_rejected() {
        let res = MemResource::new();
        assert!(matches!(
            res.write_at(u64::MAX, b"xx"),
            Err(StorageError::InvalidRange { .. })
        ));
        assert_eq!(res.len().unwrap(), 0);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_failed_read_keeps_data() {
        let res = MemResource::new();
        res.write_at(0, b"hello").unwrap();
        assert!(res.read_at(0, 10).is_err());
        assert_eq!(&res.read_at(0, 5).unwrap()[..], b"hello");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_release_and_destroy() {
        let res = MemResource::from_bytes(b"data");
        res.release().unwrap();
        assert_eq!(res.status(), ResourceStatus::Released);
        assert!(matches!(res.stat(), Err(StorageError::Closed)));

        res.destroy().unwrap();
        assert_eq!(res.status(), ResourceStatus::Destroyed);
        assert!(matches!(res.stat(), Err(StorageError::Destroyed)));
    }

    #[rstest]
    #[case(1u64 << 62)]
    #[case(i64::MAX as u64)]
    #[case(u64::MAX - 1)]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_huge_growth_is_an_error(#[case] len: u64) {
        let res = MemResource::from_bytes(b"keep");

        assert!(matches!(res.truncate(len), Err(StorageError::Io(_))));
        assert!(matches!(res.write_at(len - 1, b"x"), Err(StorageError::Io(_))));

        assert_eq!(res.len().unwrap(), 4);
        assert_eq!(&res.read_at(0, 4).unwrap()[..], b"keep");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_ptr_eq() {
        let a = MemResource::new();
        let b = a.clone();
        let c = MemResource::new();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}
