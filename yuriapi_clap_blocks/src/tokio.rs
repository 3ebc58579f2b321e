//! Config for the tokio IO runtime.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// CLI config for the tokio IO runtime.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TokioIoConfig {
    /// Set the maximum number of IO runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-threads", env = "YURIAPI_NUM_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// Specifies the limit for additional threads spawned by the IO runtime. Catalog refreshes
    /// run on these threads.
    #[clap(
        long = "max-blocking-threads",
        env = "YURIAPI_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,

    /// Sets a custom timeout for a thread in the blocking pool of the IO runtime.
    #[clap(
        long = "thread-keep-alive",
        env = "YURIAPI_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,
}

impl TokioIoConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> Result<::tokio::runtime::Builder, std::io::Error> {
        let mut builder = match self.num_threads.map(NonZeroUsize::get) {
            Some(1) => ::tokio::runtime::Builder::new_current_thread(),
            num_threads => {
                let mut builder = ::tokio::runtime::Builder::new_multi_thread();
                if let Some(n) = num_threads {
                    builder.worker_threads(n);
                }
                builder
            }
        };

        let thread_counter = Arc::new(AtomicUsize::new(1));
        builder
            .enable_all()
            .thread_name_fn(move || {
                format!("yuriapi-io-{}", thread_counter.fetch_add(1, Ordering::SeqCst))
            });

        if let Some(max) = self.max_blocking_threads {
            builder.max_blocking_threads(max.get());
        }
        if let Some(keep_alive) = self.thread_keep_alive {
            builder.thread_keep_alive(keep_alive);
        }

        Ok(builder)
    }
}
