//! Task spawning abstraction for runtime independence.
//!
//! This module provides a [`TaskSpawner`] trait that lets the engine spawn
//! background work without knowing how the host runtime tracks it. The
//! daemon and the tests use [`TokioSpawner`], which tracks every task so
//! shutdown can wait for in-flight commands and listener callbacks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::task::TaskTracker;

/// Abstraction for spawning background tasks.
///
/// Implementations should ensure tasks are properly tracked and can
/// complete even if the spawner is dropped.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future whose panic is logged under `label` instead of being
    /// lost with the task.
    fn spawn_guarded<F>(&self, label: String, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
                log::error!("[Runtime] Task {} panicked: {}", label, panic_message(&panic));
            }
        });
    }
}

/// Tokio-based spawner with task tracking.
///
/// Clones share one tracker, so every component spawning through a clone is
/// covered by [`TokioSpawner::drain`].
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
    tracker: TaskTracker,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
        }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    /// Number of tracked tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `timeout` for every tracked task to finish.
    ///
    /// Returns false if tasks were still running when the timeout elapsed.
    /// Tasks spawned after the drain started are tracked too.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        finished
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(self.tracker.track_future(future));
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
