//! Application lifecycle abstraction.
//!
//! The `system` command target asks for a restart or shutdown through the
//! [`Lifecycle`] trait rather than exiting the process itself. The daemon
//! waits on [`ServerLifecycle::exited`], runs the orderly shutdown, and then
//! exits with the requested code so the service manager can act on it.

use std::sync::atomic::{AtomicI32, Ordering};

use tokio_util::sync::CancellationToken;

use crate::constants::EXIT_CODE_RESTART;

/// Trait for application lifecycle operations.
pub trait Lifecycle: Send + Sync {
    /// Requests a process restart (also used for reloads).
    ///
    /// The process exits with [`EXIT_CODE_RESTART`] and relies on the
    /// service manager to start it again.
    fn request_restart(&self);

    /// Requests a graceful shutdown with exit code 0.
    fn request_shutdown(&self);
}

/// Lifecycle for the standalone daemon.
///
/// The first request wins; later requests do not change the exit code.
#[derive(Debug, Default)]
pub struct ServerLifecycle {
    token: CancellationToken,
    exit_code: AtomicI32,
}

impl ServerLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a restart or shutdown was requested.
    pub async fn exited(&self) {
        self.token.cancelled().await;
    }

    /// Returns true once a restart or shutdown was requested.
    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Exit code for the process.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    fn request_exit(&self, code: i32) {
        if self.token.is_cancelled() {
            log::debug!("[Lifecycle] Exit already requested, ignoring code {}", code);
            return;
        }
        self.exit_code.store(code, Ordering::SeqCst);
        self.token.cancel();
    }
}

impl Lifecycle for ServerLifecycle {
    fn request_restart(&self) {
        log::info!("[Lifecycle] Restart requested, exiting with code {}", EXIT_CODE_RESTART);
        self.request_exit(EXIT_CODE_RESTART);
    }

    fn request_shutdown(&self) {
        log::info!("[Lifecycle] Shutdown requested");
        self.request_exit(0);
    }
}

/// No-op lifecycle for testing or embedded use.
///
/// Does nothing on restart/shutdown requests. Useful in tests or when
/// embedding the engine in an application that manages its own lifecycle.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_restart(&self) {
        tracing::debug!("Restart requested (no-op)");
    }

    fn request_shutdown(&self) {
        tracing::debug!("Shutdown requested (no-op)");
    }
}
