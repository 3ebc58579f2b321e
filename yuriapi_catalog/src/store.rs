use std::{
    collections::{BTreeMap, HashSet},
    fs,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{Error, Item, Result, sampler};

/// Files in the source directory with this suffix are decoded as catalog items
pub const SOURCE_FILE_SUFFIX: &str = ".json";

/// An immutable, fully assembled view of every item in the catalog
///
/// Cloning is cheap and every clone observes the same items; there is no way to mutate a
/// published snapshot in place.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<[Item]>);

impl Snapshot {
    fn from_entries(entries: &BTreeMap<String, Item>) -> Self {
        Self(entries.values().cloned().collect())
    }

    pub fn items(&self) -> &[Item] {
        &self.0
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl Deref for Snapshot {
    type Target = [Item];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Counts reported by a successful [`CatalogStore::refresh`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Files decoded during this refresh
    pub decoded: usize,
    /// Files that could not be read or decoded and were left out of this refresh
    pub skipped: usize,
    /// Items in the snapshot published by this refresh
    pub total: usize,
}

#[derive(Debug, Default)]
struct CatalogState {
    /// Source file name -> item
    entries: BTreeMap<String, Item>,
    snapshot: Snapshot,
}

/// Holds the catalog loaded from a source directory
///
/// Reads ([`snapshot`][Self::snapshot], [`sample`][Self::sample]) only hold the read lock long
/// enough to clone the published [`Snapshot`], so they never wait on each other. A refresh lists
/// and decodes the source directory before taking the write lock, which it then holds only to
/// merge the decoded items and publish the new snapshot.
#[derive(Debug)]
pub struct CatalogStore {
    source_dir: PathBuf,
    prune_missing: bool,
    /// Serializes refreshes; never taken by readers
    refresh_lock: Mutex<()>,
    state: RwLock<CatalogState>,
}

impl CatalogStore {
    /// Create an empty store backed by `source_dir`
    ///
    /// Nothing is read until the first [`refresh`][Self::refresh].
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            prune_missing: false,
            refresh_lock: Mutex::new(()),
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Drop items whose source file no longer exists on the next refresh
    ///
    /// By default the store only ever adds or replaces items, so an item stays cached after its
    /// file is removed.
    pub fn with_prune_missing(mut self, prune_missing: bool) -> Self {
        self.prune_missing = prune_missing;
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Rescan the source directory and publish a new snapshot
    ///
    /// Files that cannot be read or decoded are logged and skipped. If the directory itself cannot
    /// be listed the refresh is abandoned and the current snapshot stays published.
    ///
    /// This performs blocking filesystem I/O; async callers should go through
    /// [`refresh_catalog`][crate::refresh_catalog].
    pub fn refresh(&self) -> Result<RefreshSummary> {
        let _refresh = self.refresh_lock.lock();

        let list_err = |source| Error::ListSourceDir {
            path: self.source_dir.clone(),
            source,
        };

        let mut listed = HashSet::new();
        let mut decoded = Vec::new();
        let mut skipped = 0;

        for entry in fs::read_dir(&self.source_dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let Ok(name) = entry.file_name().into_string() else {
                debug!(file = ?entry.file_name(), "ignoring non utf-8 file name in catalog directory");
                continue;
            };
            if !name.ends_with(SOURCE_FILE_SUFFIX) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => {
                    listed.insert(name.clone());
                }
                Err(error) => {
                    // still present, so prune mode must keep the cached item
                    listed.insert(name.clone());
                    warn!(file = %name, %error, "skipping catalog file with unreadable metadata");
                    skipped += 1;
                    continue;
                }
            }

            match Item::from_path(&entry.path()) {
                Ok(item) => decoded.push((name, item)),
                Err(error) => {
                    warn!(file = %name, %error, "skipping catalog file");
                    skipped += 1;
                }
            }
        }

        let num_decoded = decoded.len();
        let mut state = self.state.write();
        if self.prune_missing {
            state.entries.retain(|name, _| listed.contains(name));
        }
        state.entries.extend(decoded);
        state.snapshot = Snapshot::from_entries(&state.entries);

        Ok(RefreshSummary {
            decoded: num_decoded,
            skipped,
            total: state.snapshot.len(),
        })
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().snapshot.clone()
    }

    /// Up to `n` distinct items chosen uniformly at random from the current snapshot
    ///
    /// See [`sampler::sample`] for how `n` is interpreted.
    pub fn sample(&self, n: i64) -> Vec<Item> {
        let snapshot = self.snapshot();
        sampler::sample(&snapshot, n, &mut rand::thread_rng())
    }

    pub fn len(&self) -> usize {
        self.state.read().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
