#![forbid(unsafe_code)]

//! Mmap-backed storage driver.
//!
//! [`MmapDriver`] implements [`Driver`](crate::Driver) on top of `mmap-io`.
//! The file length always equals the logical size of the store, so a store
//! reopened by path reports the size it had when it was last written.
//!
//! A zero-length file cannot be mapped; the driver then stays `Empty` and
//! creates the mapping on the first write or resize.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use mmap_io::MemoryMappedFile;

use crate::{
    StorageError, StorageResult,
    driver::{Driver, Resource, remove_file_if_exists},
};

/// Chunk used when zero-filling holes.
const ZERO_CHUNK: usize = 64 * 1024;
static ZEROES: [u8; ZERO_CHUNK] = [0; ZERO_CHUNK];

/// Options for opening a [`MmapResource`].
#[derive(Debug, Clone)]
pub struct MmapOptions {
    /// Path to the backing file.
    pub path: PathBuf,
    /// Create the file (and its parent directories) when missing.
    pub create: bool,
}

impl MmapOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create: true,
        }
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }
}

/// Mmap state machine.
///
/// - `Active`: read-write mapping covering the whole file.
/// - `Empty`: zero-length file, nothing mapped.
enum MmapState {
    Active(MemoryMappedFile),
    Empty,
}

/// Mmap-backed storage driver.
pub struct MmapDriver {
    mmap: MmapState,
    path: PathBuf,
}

impl std::fmt::Debug for MmapDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapDriver")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

impl MmapDriver {
    /// Map `len` bytes of a fresh file, replacing the `Empty` state.
    fn create(&mut self, len: u64) -> StorageResult<()> {
        let m = MemoryMappedFile::create_rw(&self.path, len)?;
        self.mmap = MmapState::Active(m);
        Ok(())
    }

    /// Cut the file to `len` bytes.
    ///
    /// The old mapping is dropped first so no view of the removed tail
    /// survives the `ftruncate`.
    fn shrink(&mut self, len: u64) -> StorageResult<()> {
        self.mmap = MmapState::Empty;

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        drop(file);

        if len > 0 {
            self.mmap = MmapState::Active(MemoryMappedFile::open_rw(&self.path)?);
        }
        Ok(())
    }
}

impl Driver for MmapDriver {
    type Options = MmapOptions;

    fn open(opts: MmapOptions) -> StorageResult<Self> {
        let path = opts.path;

        let mmap = match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => MmapState::Active(MemoryMappedFile::open_rw(&path)?),
            Ok(_) => MmapState::Empty,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !opts.create {
                    return Err(StorageError::NotFound(path));
                }
                // Storage-layer responsibility: ensure parent directories exist.
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)?;
                MmapState::Empty
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), "mmap driver opened");
        Ok(Self { mmap, path })
    }

    fn len(&self) -> u64 {
        match self.mmap {
            MmapState::Active(ref m) => m.len(),
            MmapState::Empty => 0,
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        match self.mmap {
            MmapState::Active(ref m) => m.read_into(offset, buf)?,
            MmapState::Empty => buf.fill(0),
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let end = offset + data.len() as u64;

        match self.mmap {
            MmapState::Active(ref m) => {
                if end > m.len() {
                    tracing::trace!(path = %self.path.display(), from = m.len(), to = end, "growing mmap");
                    m.resize(end)?;
                }
                m.update_region(offset, data)?;
            }
            MmapState::Empty => {
                let m = MemoryMappedFile::create_rw(&self.path, end)?;
                m.update_region(offset, data)?;
                self.mmap = MmapState::Active(m);
            }
        }
        Ok(())
    }

    fn zero_range(&mut self, offset: u64, len: u64) -> StorageResult<()> {
        let MmapState::Active(ref m) = self.mmap else {
            return Ok(());
        };

        let end = offset + len;
        let mut pos = offset;
        while pos < end {
            #[expect(clippy::cast_possible_truncation)] // bounded by ZERO_CHUNK
            let n = (end - pos).min(ZERO_CHUNK as u64) as usize;
            m.update_region(pos, &ZEROES[..n])?;
            pos += n as u64;
        }
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> StorageResult<()> {
        let current = self.len();
        if len > current {
            match self.mmap {
                MmapState::Active(ref m) => m.resize(len)?,
                MmapState::Empty => self.create(len)?,
            }
            Ok(())
        } else if len < current {
            self.shrink(len)
        } else {
            Ok(())
        }
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn remove(self) -> StorageResult<()> {
        let Self { mmap, path } = self;
        drop(mmap);
        tracing::debug!(path = %path.display(), "removing backing file");
        remove_file_if_exists(&path)
    }
}

/// Mmap-backed storage resource.
///
/// Type alias for [`Resource<MmapDriver>`].
pub type MmapResource = Resource<MmapDriver>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::*;
    use tempfile::TempDir;

    use super::*;
    use crate::resource::{ResourceExt, ResourceStatus};

    fn open_at(path: &Path) -> MmapResource {
        Resource::open(MmapOptions::new(path)).expect("open test resource")
    }

    fn create_resource(dir: &TempDir) -> MmapResource {
        open_at(&dir.path().join("test.dat"))
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_create_new_resource() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);
        assert_eq!(res.len().unwrap(), 0);
        assert_eq!(res.status(), ResourceStatus::Active);
        assert!(dir.path().join("test.dat").exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_missing_file_without_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.dat");
        let result: StorageResult<MmapResource> =
            Resource::open(MmapOptions::new(&path).with_create(false));
        assert!(matches!(result, Err(StorageError::NotFound(p)) if p == path));
        assert!(!path.exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.dat");
        let res = open_at(&path);
        res.write_at(0, b"nested").unwrap();
        assert_eq!(file_len(&path), 6);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_file_length_tracks_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("len.dat");
        let res = open_at(&path);

        res.write_at(10, b"hi").unwrap();
        assert_eq!(file_len(&path), 12);

        res.write_at(0, b"hello").unwrap();
        assert_eq!(file_len(&path), 12);

        res.truncate(100).unwrap();
        assert_eq!(file_len(&path), 100);

        res.del(50, 50).unwrap();
        assert_eq!(file_len(&path), 50);

        res.truncate(0).unwrap();
        assert_eq!(file_len(&path), 0);
        assert_eq!(res.len().unwrap(), 0);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_sparse_write_zero_fill() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);

        res.write_at(10, b"hi").unwrap();
        res.write_at(0, b"hello").unwrap();

        assert_eq!(&res.read_at(0, 5).unwrap()[..], b"hello");
        assert_eq!(&res.read_at(5, 5).unwrap()[..], &[0u8; 5]);
        assert_eq!(&res.read_at(10, 2).unwrap()[..], b"hi");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);

        assert!(matches!(
            res.read_at(0, 5),
            Err(StorageError::RangeNotSatisfiable { size: 0, .. })
        ));

        res.write_at(0, b"hello").unwrap();
        assert!(matches!(
            res.read_at(0, 10),
            Err(StorageError::RangeNotSatisfiable {
                offset: 0,
                len: 10,
                size: 5
            })
        ));
        assert!(res.read_at(7, 0).unwrap().is_empty());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_hole_punch_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);

        let len = ZERO_CHUNK * 2 + 17;
        res.write_at(0, &vec![0xAB; len + 8]).unwrap();
        res.del(4, len as u64).unwrap();

        assert_eq!(res.len().unwrap(), (len + 8) as u64);
        let data = res.read_at(0, len + 8).unwrap();
        assert!(data[..4].iter().all(|&b| b == 0xAB));
        assert!(data[4..4 + len].iter().all(|&b| b == 0));
        assert!(data[4 + len..].iter().all(|&b| b == 0xAB));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_reopen_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.dat");

        {
            let res = open_at(&path);
            res.write_at(10, b"persisted").unwrap();
            res.release().unwrap();
            assert_eq!(res.status(), ResourceStatus::Released);
        }

        let res = open_at(&path);
        assert_eq!(res.len().unwrap(), 19);
        assert_eq!(&res.read_at(10, 9).unwrap()[..], b"persisted");
        assert_eq!(&res.read_at(0, 10).unwrap()[..], &[0u8; 10]);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_released_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);
        res.write_at(0, b"data").unwrap();
        res.release().unwrap();

        assert!(matches!(res.read_at(0, 4), Err(StorageError::Closed)));
        assert!(matches!(res.write_at(0, b"x"), Err(StorageError::Closed)));
        assert!(dir.path().join("test.dat").exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_destroy_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doomed.dat");
        let res = open_at(&path);
        res.write_at(0, b"data").unwrap();

        res.destroy().unwrap();
        assert_eq!(res.status(), ResourceStatus::Destroyed);
        assert!(!path.exists());
        assert!(matches!(res.len(), Err(StorageError::Destroyed)));

        // Second destroy is a no-op.
        res.destroy().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[test]
    fn test_destroy_after_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("released.dat");
        let res = open_at(&path);
        res.write_at(0, b"data").unwrap();
        res.release().unwrap();

        res.destroy().unwrap();
        assert!(!path.exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(2))]
    #[test]
    fn test_clones_share_driver_across_threads() {
        let dir = TempDir::new().unwrap();
        let res = create_resource(&dir);
        let res2 = res.clone();

        let handle = std::thread::spawn(move || {
            res2.write_at(1024, b"from thread").unwrap();
        });
        res.write_at(0, b"from main").unwrap();
        handle.join().unwrap();

        assert_eq!(&res.read_at(0, 9).unwrap()[..], b"from main");
        assert_eq!(&res.read_at(1024, 11).unwrap()[..], b"from thread");
        assert_eq!(res.len().unwrap(), 1035);
    }
}
