#![forbid(unsafe_code)]

//! Thread pool for blocking store work (file mapping, large copies, hole punching).
//!
//! Wraps [`rayon::ThreadPool`]. Stores opened through a root that carries a
//! `ThreadPool` run every operation here instead of on the calling task.
//!
//! By default the global rayon pool is used. A dedicated pool is created with
//! [`ThreadPool::with_num_threads`]; its threads are named `ravel-io-<n>`.

use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::channel::oneshot;

/// Shared thread pool for blocking I/O.
///
/// `None` delegates to the global rayon pool. Cloning is an `Arc` increment,
/// so one pool can serve many roots.
///
/// ```
/// use ravel_platform::ThreadPool;
///
/// let pool = ThreadPool::with_num_threads(2).unwrap();
/// pool.spawn(|| { /* blocking work */ });
/// ```
#[derive(Clone)]
pub struct ThreadPool {
    inner: Option<Arc<rayon::ThreadPool>>,
}

impl ThreadPool {
    /// Use the global rayon pool.
    #[must_use]
    pub fn global() -> Self {
        Self { inner: None }
    }

    /// Wrap an existing [`rayon::ThreadPool`].
    #[must_use]
    pub fn custom(pool: rayon::ThreadPool) -> Self {
        Self {
            inner: Some(Arc::new(pool)),
        }
    }

    /// Dedicated pool with `n` threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the rayon pool cannot be built.
    pub fn with_num_threads(n: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("ravel-io-{i}"))
            // Fire-and-forget tasks that panic must not abort the process.
            .panic_handler(|_| {})
            .build()?;
        Ok(Self::custom(pool))
    }

    /// Number of worker threads backing this pool.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        match self.inner {
            Some(ref pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Fire-and-forget.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.inner {
            Some(ref pool) => pool.spawn(f),
            None => rayon::spawn(f),
        }
    }

    /// Run `f` on the pool and resolve with its return value.
    ///
    /// The closure runs under `catch_unwind`, so a panic never reaches the
    /// pool's panic handler, global pool included.
    ///
    /// # Errors
    ///
    /// Returns an error if the closure panicked or its result never arrived.
    pub async fn spawn_async<F, R>(&self, f: F) -> Result<R, io::Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn(move || {
            let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(f)));
        });
        rx.await
            .map_err(|_| io::Error::other("thread pool task dropped"))?
            .map_err(|_| io::Error::other("thread pool task panicked"))
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Some(ref pool) => f
                .debug_struct("ThreadPool")
                .field("kind", &"dedicated")
                .field("num_threads", &pool.current_num_threads())
                .finish(),
            None => f
                .debug_struct("ThreadPool")
                .field("kind", &"global")
                .finish(),
        }
    }
}
