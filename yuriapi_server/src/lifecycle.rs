//! Service lifecycle: seed the catalog, serve, drain on shutdown.
//!
//! ```text
//! Starting --seed ok--> Running --signal--> Draining --drained or grace expired--> Stopped
//!     \--seed failed--------------------------------------------------------------/
//! ```
//!
//! While `Draining`, the listener no longer accepts connections, requests already in flight run
//! to completion and the refresh task stops at its next wait point. The drain is bounded by the
//! grace period; the returned [`ShutdownOutcome`] records whether it had to be cut short.
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};
use yuriapi_catalog::{CatalogStore, RefreshSummary, background_refresh_process, refresh_catalog};
use yuriapi_shutdown::{ShutdownManager, ShutdownOutcome, drain_within};

use crate::{CreateServerArgs, Error, Result, Server, http::HttpApi, serve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug)]
pub struct LifecycleArgs {
    pub store: Arc<CatalogStore>,
    pub listener: TcpListener,
    /// Root of the image tree; the image endpoint answers 503 without it
    pub images_dir: Option<PathBuf>,
    /// Must be non-zero
    pub refresh_interval: Duration,
    pub grace_period: Duration,
}

#[derive(Debug)]
pub struct Lifecycle {
    args: LifecycleArgs,
    state: watch::Sender<LifecycleState>,
}

fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    let previous = state.send_replace(next);
    info!(from = ?previous, to = ?next, "lifecycle transition");
}

impl Lifecycle {
    pub fn new(args: LifecycleArgs) -> Self {
        Self {
            args,
            state: watch::Sender::new(LifecycleState::Starting),
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run the service until `signal` resolves, then drain and stop
    ///
    /// Fails without serving anything if the initial catalog load fails. A forced shutdown is
    /// not an error: it is reported as [`ShutdownOutcome::Forced`].
    pub async fn run<F>(self, signal: F) -> Result<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let Self { args, state } = self;
        let LifecycleArgs {
            store,
            listener,
            images_dir,
            refresh_interval,
            grace_period,
        } = args;

        match refresh_catalog(Arc::clone(&store)).await {
            Ok(RefreshSummary {
                decoded,
                skipped,
                total,
            }) => info!(
                decoded,
                skipped,
                total,
                source_dir = %store.source_dir().display(),
                "loaded catalog"
            ),
            Err(e) => {
                error!(error = %e, "failed to load the initial catalog");
                transition(&state, LifecycleState::Stopped);
                return Err(Error::SeedCatalog(e));
            }
        }

        let shutdown_manager = ShutdownManager::new();
        let mut refresh_task = background_refresh_process(
            Arc::clone(&store),
            refresh_interval,
            shutdown_manager.register(),
        );

        let server = Server::new(CreateServerArgs {
            http: Arc::new(HttpApi::new(store, images_dir)),
            listener,
        });
        let mut server_task = tokio::spawn(serve(server, shutdown_manager.listener_token()));
        transition(&state, LifecycleState::Running);

        let mut server_result = None;
        tokio::select! {
            _ = signal => info!("Shutdown requested"),
            res = &mut server_task => {
                error!("HTTP server stopped unexpectedly");
                server_result = Some(res);
            }
        }

        transition(&state, LifecycleState::Draining);
        shutdown_manager.shutdown();

        let outcome = drain_within(grace_period, async {
            shutdown_manager.join().await;
            if let Err(e) = (&mut refresh_task).await {
                warn!(error = %e, "catalog refresh task failed");
            }
            if server_result.is_none() {
                server_result = Some((&mut server_task).await);
            }
        })
        .await;

        match outcome {
            ShutdownOutcome::Clean => info!("shutdown complete"),
            ShutdownOutcome::Forced => {
                server_task.abort();
                refresh_task.abort();
                warn!(
                    grace_period = ?grace_period,
                    "grace period elapsed with work in flight, forcing shutdown"
                );
            }
        }
        transition(&state, LifecycleState::Stopped);

        match server_result {
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(Error::ServerTask(e)),
            Some(Ok(Ok(()))) | None => Ok(outcome),
        }
    }
}
