#![forbid(unsafe_code)]

//! Name-keyed registry of shared store resources.
//!
//! A [`StorageRoot`] maps store names to the resource backing them. Every
//! handle opened against a name while another handle holds it shares one
//! resource, so all of them observe the same size and bytes.
//!
//! ## Entry lifetime
//!
//! - Disk entries are reference counted by open handles. The last close drops
//!   the mapping and descriptor and forgets the entry; the file stays.
//! - Memory entries outlive their handles (the buffer *is* the store) and are
//!   dropped only by destroy.
//!
//! ## Names
//!
//! Names are relative, `/`-separated paths. Backslashes normalise to `/`,
//! `.` segments are dropped; absolute names, `..` and empty segments are
//! rejected.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::{DashMap, mapref::entry::Entry as MapEntry};

use crate::{
    Backend, MemResource, MmapOptions, Resource, RootOptions, StorageError, StorageResource,
    StorageResult, Store, StoreOptions, driver::remove_file_if_exists, resource::ResourceExt,
};

struct Entry {
    resource: StorageResource,
    handles: usize,
}

struct RootInner {
    options: RootOptions,
    entries: DashMap<String, Entry>,
}

/// Registry that resolves store names to shared backing resources.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct StorageRoot {
    inner: Arc<RootInner>,
}

impl fmt::Debug for StorageRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRoot")
            .field("backend", &self.inner.options.backend)
            .field("entries", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl StorageRoot {
    pub fn new(options: RootOptions) -> Self {
        Self {
            inner: Arc::new(RootInner {
                options,
                entries: DashMap::new(),
            }),
        }
    }

    /// Root storing one file per store under `root_dir`.
    pub fn disk<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self::new(RootOptions::disk(root_dir))
    }

    /// Root keeping every store in memory.
    pub fn memory() -> Self {
        Self::new(RootOptions::memory())
    }

    pub fn options(&self) -> &RootOptions {
        &self.inner.options
    }

    /// Handle for `name`. Nothing is touched until the handle is opened,
    /// explicitly or by its first operation.
    pub fn store(&self, name: impl Into<String>, options: StoreOptions) -> Store {
        Store::new(self.clone(), name.into(), options)
    }

    /// Create a handle for `name` and open it.
    ///
    /// # Errors
    ///
    /// Any open failure (bad options, bad name, I/O). Nothing is left
    /// behind that [`StorageRoot::destroy`] could not remove.
    pub async fn open(&self, name: impl Into<String>, options: StoreOptions) -> StorageResult<Store> {
        let store = self.store(name, options);
        store.open().await?;
        Ok(store)
    }

    /// Remove the store called `name` and all its bytes.
    ///
    /// Handles still sharing the store fail later operations with
    /// [`StorageError::Destroyed`].
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] for a malformed name, or an I/O
    /// error if the backing file cannot be removed.
    pub async fn destroy(&self, name: &str) -> StorageResult<()> {
        let key = normalize_name(name)?;
        let root = self.clone();
        self.run(move || root.destroy_entry(&key)).await
    }

    /// Whether the registry currently tracks `name`.
    pub fn contains(&self, name: &str) -> bool {
        normalize_name(name).is_ok_and(|key| self.inner.entries.contains_key(&key))
    }

    /// Number of open handles sharing `name`.
    pub fn open_handles(&self, name: &str) -> usize {
        normalize_name(name)
            .ok()
            .and_then(|key| self.inner.entries.get(&key).map(|e| e.handles))
            .unwrap_or(0)
    }

    /// Backing file for `name` on disk roots.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        normalize_name(name)
            .ok()
            .and_then(|key| self.resource_path(&key))
    }

    pub(crate) fn check_cancelled(&self) -> StorageResult<()> {
        match self.inner.options.cancel {
            Some(ref cancel) if cancel.is_cancelled() => Err(StorageError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Run blocking store work with the configured dispatch.
    pub(crate) async fn run<F, R>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce() -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        match self.inner.options.pool {
            Some(ref pool) => pool.spawn_async(f).await?,
            None => f(),
        }
    }

    /// Take a handle's share of the resource for `key`, opening it if needed.
    pub(crate) fn acquire(&self, key: &str, create: bool) -> StorageResult<StorageResource> {
        match self.inner.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.handles += 1;
                Ok(entry.resource.clone())
            }
            MapEntry::Vacant(vacant) => {
                // Opened under the shard lock: one resource per name, and a
                // concurrent destroy of the same name cannot interleave.
                // Other names in this shard wait for the open.
                let resource = self.open_backing(key, create)?;
                tracing::debug!(name = key, backend = ?self.inner.options.backend, "backing resource opened");
                vacant.insert(Entry {
                    resource: resource.clone(),
                    handles: 1,
                });
                Ok(resource)
            }
        }
    }

    /// Give back a handle's share. The last share of a disk store releases it.
    pub(crate) fn release(&self, key: &str, resource: &StorageResource) -> StorageResult<()> {
        let now_unused = match self.inner.entries.get_mut(key) {
            Some(mut entry) if entry.resource.ptr_eq(resource) => {
                entry.handles = entry.handles.saturating_sub(1);
                entry.handles == 0
            }
            _ => false,
        };

        if !now_unused || self.inner.options.backend == Backend::Memory {
            return Ok(());
        }

        // Re-check under the shard lock: another handle may have acquired it meanwhile.
        if let Some((_, entry)) = self
            .inner
            .entries
            .remove_if(key, |_, e| e.handles == 0 && e.resource.ptr_eq(resource))
        {
            tracing::debug!(name = key, "last handle closed, releasing backing resource");
            entry.resource.release()?;
        }
        Ok(())
    }

    pub(crate) fn destroy_entry(&self, key: &str) -> StorageResult<()> {
        let path = self.resource_path(key);

        if let Some((_, entry)) = self.inner.entries.remove(key) {
            entry.resource.destroy()?;
        } else if let Some(ref path) = path {
            remove_file_if_exists(path)?;
        }

        if self.inner.options.rmdir
            && let Some(ref path) = path
            && let Backend::Disk { ref root_dir } = self.inner.options.backend
        {
            remove_empty_parents(root_dir, path);
        }

        tracing::debug!(name = key, "store destroyed");
        Ok(())
    }

    fn open_backing(&self, key: &str, create: bool) -> StorageResult<StorageResource> {
        match self.inner.options.backend {
            Backend::Disk { ref root_dir } => {
                let opts = MmapOptions::new(root_dir.join(key)).with_create(create);
                Ok(StorageResource::Mmap(Resource::open(opts)?))
            }
            Backend::Memory if create => Ok(StorageResource::Mem(MemResource::new())),
            Backend::Memory => Err(StorageError::NotFound(PathBuf::from(key))),
        }
    }

    fn resource_path(&self, key: &str) -> Option<PathBuf> {
        match self.inner.options.backend {
            Backend::Disk { ref root_dir } => Some(root_dir.join(key)),
            Backend::Memory => None,
        }
    }
}

/// Validate a store name and bring it to its registry key form.
pub(crate) fn normalize_name(name: &str) -> StorageResult<String> {
    let s = name.replace('\\', "/");
    if s.is_empty() || s.starts_with('/') {
        return Err(StorageError::invalid(format!("invalid store name {name:?}")));
    }

    let mut segments = Vec::new();
    for seg in s.split('/') {
        match seg {
            "" | ".." => {
                return Err(StorageError::invalid(format!("invalid store name {name:?}")));
            }
            "." => {}
            seg => segments.push(seg),
        }
    }

    if segments.is_empty() {
        return Err(StorageError::invalid(format!("invalid store name {name:?}")));
    }
    Ok(segments.join("/"))
}

/// Remove directories between `path` and `root_dir` that are now empty.
fn remove_empty_parents(root_dir: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root_dir || !d.starts_with(root_dir) {
            break;
        }
        // Stops at the first directory that still has entries.
        if std::fs::remove_dir(d).is_err() {
            break;
        }
        tracing::trace!(dir = %d.display(), "removed empty directory");
        dir = d.parent();
    }
}
