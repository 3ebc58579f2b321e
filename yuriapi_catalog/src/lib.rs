//! In-memory catalog of items loaded from a directory of JSON files.
//!
//! The [`CatalogStore`] keeps the most recently published [`Snapshot`] of the catalog and
//! republishes it on every [`refresh`][CatalogStore::refresh]. Readers only ever see complete
//! snapshots. [`background_refresh_process`] keeps the store current while the service runs.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use std::path::PathBuf;

use thiserror::Error;

pub mod item;
pub mod refresh;
pub mod sampler;
pub mod store;

pub use item::{ImageSize, ImageVariant, Item};
pub use refresh::{background_refresh_process, refresh_catalog};
pub use store::{CatalogStore, RefreshSummary, SOURCE_FILE_SUFFIX, Snapshot};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to list catalog directory {}: {source}", path.display())]
    ListSourceDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read catalog file {}: {source}", path.display())]
    ReadItem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode catalog file {}: {source}", path.display())]
    DecodeItem {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("catalog refresh task failed: {0}")]
    RefreshTask(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
