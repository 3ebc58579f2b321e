//! Entrypoint for the yuriapi server

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;
use yuriapi_catalog::CatalogStore;
use yuriapi_clap_blocks::{logging::LoggingConfig, socket_addr::SocketAddr};
use yuriapi_server::{Lifecycle, LifecycleArgs};
use yuriapi_shutdown::wait_for_signal;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("Failed to bind address")]
    BindAddress(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[from] yuriapi_server::Error),

    #[error("cache interval must be greater than zero")]
    InvalidRefreshInterval,
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// The address on which yuriapi will serve HTTP API requests
    #[clap(long = "http-bind", env = "ADDR", action)]
    pub(crate) http_bind_address: SocketAddr,

    /// Directory holding one `<name>.json` file per catalog item
    #[clap(long = "json-dir", env = "JSON_DIR", action)]
    pub(crate) json_dir: PathBuf,

    /// How often the catalog is reloaded from `--json-dir`
    #[clap(
        long = "cache-interval",
        env = "CACHE_INTERVAL",
        default_value = "6h",
        action
    )]
    pub(crate) cache_interval: humantime::Duration,

    /// Root of the image tree, laid out as `<cid>/<index>.jpeg`
    ///
    /// The image endpoint answers 503 when this is not set.
    #[clap(long = "images-dir", env = "IMAGES_DIR", action)]
    pub(crate) images_dir: Option<PathBuf>,

    /// How long in-flight requests may keep running after a termination signal
    #[clap(
        long = "shutdown-grace-period",
        env = "YURIAPI_SHUTDOWN_GRACE_PERIOD",
        default_value = "15s",
        action
    )]
    pub(crate) shutdown_grace_period: humantime::Duration,

    /// Drop catalog items whose source file has been removed
    ///
    /// By default items stay cached once loaded, even after their file disappears.
    #[clap(long = "prune-missing", env = "YURIAPI_PRUNE_MISSING", action)]
    pub(crate) prune_missing: bool,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        json_dir = %config.json_dir.display(),
        images_dir = ?config.images_dir,
        cache_interval = %config.cache_interval,
        prune_missing = config.prune_missing,
        "yuriapi server starting",
    );

    let refresh_interval = *config.cache_interval;
    if refresh_interval.is_zero() {
        return Err(Error::InvalidRefreshInterval);
    }

    let store =
        Arc::new(CatalogStore::new(config.json_dir).with_prune_missing(config.prune_missing));

    let listener = TcpListener::bind(*config.http_bind_address)
        .await
        .map_err(Error::BindAddress)?;

    let outcome = Lifecycle::new(LifecycleArgs {
        store,
        listener,
        images_dir: config.images_dir,
        refresh_interval,
        grace_period: *config.shutdown_grace_period,
    })
    .run(wait_for_signal())
    .await?;

    info!(forced = outcome.is_forced(), "yuriapi server stopped");
    Ok(())
}
