#![forbid(unsafe_code)]

//! Platform primitives shared by ravel crates.
//!
//! # Synchronization
//!
//! Re-exports [`parking_lot`] lock types so that every crate in the
//! workspace locks the same way (no poisoning, `lock()` returns the guard).
//!
//! # Dispatch
//!
//! [`ThreadPool`] runs blocking store I/O on a rayon pool and hands the
//! result back to async callers through a one-shot channel.

mod pool;

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use pool::ThreadPool;
