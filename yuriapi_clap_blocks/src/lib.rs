//! Reusable clap argument groups for yuriapi commands.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub mod logging;
pub mod socket_addr;
pub mod tokio;
