#![forbid(unsafe_code)]

//! `ravel-storage`
//!
//! Named, persistent, random-access byte stores.
//!
//! A [`StorageRoot`] hands out [`Store`] handles by name. Each store is a
//! growable byte array supporting positioned `read`/`write`, `del` (hole
//! punch or tail cut), `truncate` and `stat`. Handles open lazily and every
//! handle for one name shares the same bytes.
//!
//! Backends:
//! - disk: one file per store, accessed through `mmap-io`; the file length
//!   is always the store size, so the size survives reopen
//! - memory: one buffer per store, kept by the root until destroyed
//!
//! Lower layers are public as well: [`Resource<D>`] over a [`Driver`]
//! ([`MmapResource`], [`MemResource`]) offers the same operations
//! synchronously.

mod driver;
mod error;
mod memory;
mod mmap;
mod options;
mod resource;
mod root;
mod store;
mod unified;

pub use driver::{Driver, Resource};
pub use error::{StorageError, StorageResult};
pub use memory::{MemDriver, MemOptions, MemResource};
pub use mmap::{MmapDriver, MmapOptions, MmapResource};
pub use options::{Backend, RootOptions, StoreOptions};
pub use resource::{ResourceExt, ResourceStatus, StoreStat};
pub use root::StorageRoot;
pub use store::Store;
pub use unified::StorageResource;
