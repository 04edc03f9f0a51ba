//! Staging of named artifacts in and out of a job's working directory.
//!
//! A stage job's action logic only names files; it should not care whether an
//! input is a fresh download, a prior node's output, or a shared reference
//! already sitting in the directory from an earlier hydrate. [`StageManager`]
//! owns that distinction: [`hydrate`](StageManager::hydrate) makes named
//! files physically present (fetching from the store only when missing) and
//! [`persist`](StageManager::persist) records new outputs back into the
//! store and the job's artifact map.

use std::path::{Path, PathBuf};

use super::map::{ArtifactKey, ArtifactMap};
use super::store::{ArtifactStore, StoreError};

/// Bridges one working directory and the shared [`ArtifactStore`].
///
/// Working directories are node-scoped temporary storage: nothing in them is
/// guaranteed to survive the node's completion, and other nodes may only see
/// their contents through the store.
pub struct StageManager {
    store: ArtifactStore,
    work_dir: PathBuf,
}

impl StageManager {
    #[must_use]
    pub fn new(store: ArtifactStore, work_dir: &Path) -> Self {
        Self {
            store,
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Ensure each keyed file exists physically in the working directory.
    ///
    /// Files already present are left untouched, so calling this twice with
    /// the same keys fetches at most once. Requesting a key the map does not
    /// hold, or a handle the store does not know, is fatal.
    pub fn hydrate(&self, map: &ArtifactMap, keys: &[ArtifactKey]) -> Result<(), StoreError> {
        let span = tracing::debug_span!("hydrate", dir = %self.work_dir.display(), keys = keys.len());
        let _guard = span.enter();
        self.store.get_many(&self.work_dir, map, keys)
    }

    /// Store each keyed file from the working directory and bind the new
    /// handles into `map`.
    pub fn persist(&self, map: &mut ArtifactMap, keys: &[ArtifactKey]) -> Result<(), StoreError> {
        let span = tracing::debug_span!("persist", dir = %self.work_dir.display(), keys = keys.len());
        let _guard = span.enter();
        self.store.put_many(&self.work_dir, map, keys)
    }

    /// Absolute path a key's file takes inside this working directory.
    #[must_use]
    pub fn path_of(&self, key: &ArtifactKey) -> PathBuf {
        self.work_dir.join(key.filename())
    }
}
