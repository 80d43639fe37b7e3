#![forbid(unsafe_code)]

//! Async random-access store handle.
//!
//! A [`Store`] is created by [`StorageRoot::store`] in a pending state and
//! opens on first use. Once open it shares the root's resource for its name
//! until it is closed or destroyed.
//!
//! ```text
//! Pending ──open ok──> Open ──close──> Closed
//!    │ ↺ open failed     │
//!    └─────destroy───────┴──destroy──> Destroyed
//! ```

use std::{fmt, path::PathBuf, sync::Arc};

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{
    StorageError, StorageResource, StorageResult, StorageRoot, StoreOptions,
    resource::{ResourceExt, StoreStat},
    root::normalize_name,
};

enum Lifecycle {
    Pending,
    Open {
        key: String,
        resource: StorageResource,
    },
    Closed,
    Destroyed,
}

struct StoreInner {
    root: StorageRoot,
    name: String,
    options: StoreOptions,
    lifecycle: Mutex<Lifecycle>,
}

/// Handle to one named store of a [`StorageRoot`].
///
/// Clones refer to the same handle: closing one closes all of them. Open a
/// second handle through the root to get independent lifecycle.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub(crate) fn new(root: StorageRoot, name: String, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root,
                name,
                options,
                lifecycle: Mutex::new(Lifecycle::Pending),
            }),
        }
    }

    /// Name as given to [`StorageRoot::store`].
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn root(&self) -> &StorageRoot {
        &self.inner.root
    }

    /// Backing file on disk roots.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.root.path_of(&self.inner.name)
    }

    pub async fn is_open(&self) -> bool {
        matches!(*self.inner.lifecycle.lock().await, Lifecycle::Open { .. })
    }

    /// Open the handle now instead of on first use.
    ///
    /// Applies `truncate`, then `size`, then `content`. A failed open leaves
    /// the handle pending; the next operation tries again.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] for bad options or a bad name.
    /// - [`StorageError::NotFound`] when a read-only handle names a missing store.
    /// - [`StorageError::Closed`] / [`StorageError::Destroyed`] after close/destroy.
    pub async fn open(&self) -> StorageResult<()> {
        self.resource().await.map(|_| ())
    }

    /// Read exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::RangeNotSatisfiable`] if the range reaches past the size.
    pub async fn read(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        let resource = self.resource().await?;
        if !self.inner.options.readable {
            return Err(StorageError::NotReadable);
        }
        self.inner
            .root
            .run(move || resource.read_at(offset, len))
            .await
    }

    /// Write `data` at `offset`, growing the store if needed.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotWritable`] on read-only handles, or I/O failure.
    pub async fn write(&self, offset: u64, data: impl Into<Bytes>) -> StorageResult<()> {
        let data = data.into();
        let resource = self.writable_resource().await?;
        tracing::trace!(name = %self.inner.name, offset, len = data.len(), "write");
        self.inner
            .root
            .run(move || resource.write_at(offset, &data))
            .await
    }

    /// Delete `len` bytes at `offset`: a hole inside the store, a cut at its tail.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotWritable`] on read-only handles, or I/O failure.
    pub async fn del(&self, offset: u64, len: u64) -> StorageResult<()> {
        let resource = self.writable_resource().await?;
        self.inner
            .root
            .run(move || resource.del(offset, len))
            .await
    }

    /// Set the size to exactly `len`.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotWritable`] on read-only handles, or I/O failure.
    pub async fn truncate(&self, len: u64) -> StorageResult<()> {
        let resource = self.writable_resource().await?;
        self.inner
            .root
            .run(move || resource.truncate(len))
            .await
    }

    /// Current size.
    ///
    /// # Errors
    ///
    /// Open failures, or [`StorageError::Closed`] / [`StorageError::Destroyed`].
    pub async fn stat(&self) -> StorageResult<StoreStat> {
        let resource = self.resource().await?;
        self.inner.root.run(move || resource.stat()).await
    }

    /// Release this handle's share of the store. Idempotent.
    ///
    /// The bytes stay; a new handle for the same name sees them.
    ///
    /// # Errors
    ///
    /// [`StorageError::Destroyed`] if the handle was destroyed, or a failure
    /// releasing the backing resource.
    pub async fn close(&self) -> StorageResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Open { key, resource } => {
                tracing::debug!(name = %key, "closing store");
                let root = self.inner.root.clone();
                self.inner
                    .root
                    .run(move || root.release(&key, &resource))
                    .await
            }
            Lifecycle::Pending | Lifecycle::Closed => Ok(()),
            Lifecycle::Destroyed => {
                *lifecycle = Lifecycle::Destroyed;
                Err(StorageError::Destroyed)
            }
        }
    }

    /// Remove the store and its bytes. Works from any state, including after
    /// a failed open. Idempotent.
    ///
    /// # Errors
    ///
    /// I/O failure removing the backing file.
    pub async fn destroy(&self) -> StorageResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let key = match std::mem::replace(&mut *lifecycle, Lifecycle::Destroyed) {
            Lifecycle::Destroyed => return Ok(()),
            Lifecycle::Open { key, .. } => key,
            Lifecycle::Pending | Lifecycle::Closed => match normalize_name(&self.inner.name) {
                Ok(key) => key,
                // A name that never resolved has nothing behind it.
                Err(_) => return Ok(()),
            },
        };

        tracing::debug!(name = %key, "destroying store");
        let root = self.inner.root.clone();
        self.inner
            .root
            .run(move || root.destroy_entry(&key))
            .await
    }

    async fn writable_resource(&self) -> StorageResult<StorageResource> {
        let resource = self.resource().await?;
        if !self.inner.options.writable {
            return Err(StorageError::NotWritable);
        }
        Ok(resource)
    }

    /// The open resource, opening the handle first if it is pending.
    async fn resource(&self) -> StorageResult<StorageResource> {
        self.inner.root.check_cancelled()?;

        let mut lifecycle = self.inner.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Open { ref resource, .. } => return Ok(resource.clone()),
            Lifecycle::Closed => return Err(StorageError::Closed),
            Lifecycle::Destroyed => return Err(StorageError::Destroyed),
            Lifecycle::Pending => {}
        }

        let key = normalize_name(&self.inner.name)?;
        let size = self.inner.options.validate()?;

        let root = self.inner.root.clone();
        let options = self.inner.options.clone();
        let open_key = key.clone();
        let resource = self
            .inner
            .root
            .run(move || open_shared(&root, &open_key, &options, size))
            .await?;

        tracing::debug!(
            name = %key,
            writable = self.inner.options.writable,
            readable = self.inner.options.readable,
            "store opened"
        );
        *lifecycle = Lifecycle::Open {
            key,
            resource: resource.clone(),
        };
        Ok(resource)
    }
}

/// Take a share of the resource for `key` and apply the open-time options.
fn open_shared(
    root: &StorageRoot,
    key: &str,
    options: &StoreOptions,
    size: Option<u64>,
) -> StorageResult<StorageResource> {
    let resource = root.acquire(key, options.writable)?;
    if let Err(e) = apply_options(&resource, options, size) {
        if let Err(release_err) = root.release(key, &resource) {
            tracing::warn!(name = key, error = %release_err, "release after failed open");
        }
        return Err(e);
    }
    Ok(resource)
}

fn apply_options(
    resource: &StorageResource,
    options: &StoreOptions,
    size: Option<u64>,
) -> StorageResult<()> {
    if options.truncate {
        resource.truncate(0)?;
    }
    if let Some(size) = size {
        resource.truncate(size)?;
    }
    if let Some(ref content) = options.content {
        resource.write_at(0, content)?;
    }
    Ok(())
}
