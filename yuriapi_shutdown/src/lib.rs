//! Coordinate process shutdown
//!
//! The service runs two kinds of work that must be stopped when the process receives a
//! termination signal: the HTTP listener, and background tasks such as the periodic catalog
//! refresh. The [`ShutdownManager`] owns the cancellation state for both.
//!
//! Calling [`shutdown`][ShutdownManager::shutdown] cancels the listener token, so the accept loop
//! stops taking new connections and begins draining the ones it has, and wakes every background
//! task that holds a [`ShutdownToken`]. Background tasks are never pre-empted: they observe the
//! token at their next wait point, finish whatever they are doing and report back with
//! [`complete`][ShutdownToken::complete]. [`join`][ShutdownManager::join] resolves once every
//! registered task has reported.
//!
//! The whole drain is bounded by [`drain_within`], which distinguishes a clean stop from one that
//! had to be forced because the grace period elapsed.
use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}

/// How the drain phase of a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight work finished inside the grace period
    Clean,
    /// The grace period elapsed with work still outstanding
    Forced,
}

impl ShutdownOutcome {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Forced)
    }
}

/// Drive `drain` to completion, giving up once `grace_period` has elapsed
///
/// The future is dropped on expiry; anything it was waiting on is left to be torn down with the
/// runtime.
pub async fn drain_within<F>(grace_period: Duration, drain: F) -> ShutdownOutcome
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(grace_period, drain).await {
        Ok(()) => ShutdownOutcome::Clean,
        Err(_) => ShutdownOutcome::Forced,
    }
}

/// Manage application shutdown
#[derive(Debug)]
pub struct ShutdownManager {
    listener_shutdown: CancellationToken,
    task_shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            listener_shutdown: CancellationToken::new(),
            task_shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Token handed to the HTTP accept loop; it is cancelled as soon as shutdown begins
    pub fn listener_token(&self) -> CancellationToken {
        self.listener_shutdown.clone()
    }

    /// Register a background task that needs to finish before the process may exit
    ///
    /// The caller must invoke [`complete`][ShutdownToken::complete] once it has stopped, otherwise
    /// [`join`][Self::join] will not resolve.
    pub fn register(&self) -> ShutdownToken {
        let (tx, rx) = oneshot::channel();
        self.tasks.spawn(rx);
        ShutdownToken::new(self.task_shutdown.clone(), tx)
    }

    /// Begin shutdown: stop accepting connections and wake registered background tasks
    pub fn shutdown(&self) {
        self.listener_shutdown.cancel();
        self.task_shutdown.cancel();
    }

    /// Waits for every registered task to signal completion
    pub async fn join(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// A token that a background task obtains via [`register`][ShutdownManager::register]
///
/// Clones share the same completion slot, so any copy may report completion.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    token: CancellationToken,
    complete_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownToken {
    fn new(token: CancellationToken, complete_tx: oneshot::Sender<()>) -> Self {
        Self {
            token,
            complete_tx: Arc::new(Mutex::new(Some(complete_tx))),
        }
    }

    /// Future that completes once shutdown has been requested
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Tell the [`ShutdownManager`] that the owning task has stopped
    pub fn complete(&self) {
        if let Some(s) = self.complete_tx.lock().take() {
            let _ = s.send(());
        }
    }
}
