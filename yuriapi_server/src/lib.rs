//! yuriapi server implementation
//!
//! The server is responsible for handling the HTTP API and for running the service lifecycle
//! around it.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

pub mod http;
pub mod lifecycle;

use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder as ConnectionBuilder, graceful::GracefulShutdown},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::http::{HttpApi, route_request};

pub use lifecycle::{Lifecycle, LifecycleArgs, LifecycleState};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load the initial catalog: {0}")]
    SeedCatalog(#[source] yuriapi_catalog::Error),

    #[error("server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub struct CreateServerArgs {
    pub http: Arc<HttpApi>,
    pub listener: TcpListener,
}

#[derive(Debug)]
pub struct Server {
    http: Arc<HttpApi>,
    listener: TcpListener,
}

impl Server {
    pub fn new(CreateServerArgs { http, listener }: CreateServerArgs) -> Self {
        Self { http, listener }
    }
}

/// Accept connections until `shutdown` is cancelled, then wait for the open ones to finish
///
/// The listening socket is closed as soon as shutdown begins, so new connection attempts are
/// refused while in-flight requests complete. Idle keep-alive connections are closed.
pub async fn serve(server: Server, shutdown: CancellationToken) -> Result<()> {
    let Server { http, listener } = server;
    let addr = listener.local_addr()?;
    info!(address = %addr, "listening for HTTP requests");

    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(err = %e, "failed to accept connection");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(err = %e, "cannot set TCP_NODELAY on the incoming socket");
                }
                trace!(%remote_addr, "accepted connection");

                let http = Arc::clone(&http);
                let graceful_watcher = graceful.watcher();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| route_request(Arc::clone(&http), req));

                    let conn = ConnectionBuilder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .into_owned();
                    let conn = graceful_watcher.watch(conn);

                    if let Err(e) = conn.await {
                        error!("Error serving connection: {:?}", e);
                    }
                });
            }
        }
    }

    drop(listener);
    trace!("Starting graceful shutdown, waiting for connections to close");
    graceful.shutdown().await;
    info!("All connections closed gracefully");

    Ok(())
}
