//! Content-addressed artifact store.
//!
//! The store is the durable ledger of a pipeline run: every intermediate a
//! job wants its successors to see goes through [`ArtifactStore::put`], and
//! every input a job needs on disk comes back out through
//! [`ArtifactStore::get`]. Handles are SHA-256 digests of the stored bytes,
//! so a handle is bound to exactly one immutable byte stream for its entire
//! life and re-deriving identical content is free.
//!
//! The store is shared by every concurrently running job. Each `put`
//! addresses a fresh (or identical) entry, so writers never contend on the
//! same ledger slot; the ledger lock only guards the index itself.

use miette::Diagnostic;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::map::{ArtifactKey, ArtifactMap, MapError};

/// Opaque reference to one immutable byte stream in the store.
///
/// The wrapped string is the lowercase hex SHA-256 digest of the content.
/// Handles compare by value and are cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    /// Digest raw bytes into a handle. Mostly useful in tests and wiring
    /// code; real artifacts are digested by [`ArtifactStore::put`].
    #[must_use]
    pub fn from_digest_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactHandle({})", self.short())
    }
}

/// Errors raised by store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// A `get` was issued for a handle the ledger does not know.
    ///
    /// This is a scheduling or bookkeeping bug, not a user error: handles
    /// only come from `put`, so an unknown one means the graph let a
    /// consumer run before its producer.
    #[error("unknown artifact handle {handle}")]
    #[diagnostic(
        code(germweave::store::unknown_handle),
        help("Handles are only minted by put; an unknown handle indicates a dependency-ordering bug.")
    )]
    UnknownHandle { handle: ArtifactHandle },

    /// Filesystem failure while copying bytes in or out of the store.
    #[error("store I/O failure on {path}: {source}")]
    #[diagnostic(code(germweave::store::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Map bookkeeping failed while recording a batch operation.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Map(#[from] MapError),
}

/// Content-addressed, shared artifact storage rooted at one directory.
///
/// Cloning is cheap: all clones share the same ledger and on-disk root.
///
/// # Examples
///
/// ```no_run
/// use germweave::artifacts::{ArtifactStore, ArtifactKey, ArtifactMap};
/// use std::path::Path;
///
/// # fn demo() -> Result<(), germweave::artifacts::StoreError> {
/// let store = ArtifactStore::open(Path::new("/tmp/germweave-store"))?;
/// let handle = store.put(Path::new("/data/ref.fa"))?;
/// store.get(&handle, Path::new("/scratch/job-1/ref.fa"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ArtifactStore {
    root: Arc<PathBuf>,
    ledger: Arc<Mutex<FxHashMap<ArtifactHandle, PathBuf>>>,
}

impl ArtifactStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root).map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root: Arc::new(root.to_path_buf()),
            ledger: Arc::new(Mutex::new(FxHashMap::default())),
        })
    }

    /// Copy the file at `local_path` into durable storage and return its
    /// handle.
    ///
    /// Content is digested first; identical bytes deduplicate onto the same
    /// ledger entry and handle. Distinct contents always mint distinct
    /// handles, so storing the same logical filename from two different
    /// nodes never aliases.
    pub fn put(&self, local_path: &Path) -> Result<ArtifactHandle, StoreError> {
        let bytes = std::fs::read(local_path).map_err(|source| StoreError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;
        let handle = ArtifactHandle::from_digest_bytes(&bytes);

        let stored_path = self.entry_path(&handle);
        {
            let mut ledger = self.ledger.lock().expect("store ledger poisoned");
            if ledger.contains_key(&handle) {
                tracing::debug!(handle = %handle, path = %local_path.display(), "artifact already stored, deduplicating");
                return Ok(handle);
            }
            // Reserve the slot before releasing the lock; the write below is
            // idempotent for identical content so a racing duplicate is harmless.
            ledger.insert(handle.clone(), stored_path.clone());
        }

        if let Some(parent) = stored_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&stored_path, &bytes).map_err(|source| StoreError::Io {
            path: stored_path.clone(),
            source,
        })?;

        tracing::debug!(
            handle = %handle,
            bytes = bytes.len(),
            source = %local_path.display(),
            "artifact stored"
        );
        Ok(handle)
    }

    /// Materialize the artifact behind `handle` at `local_path`.
    ///
    /// A no-op when a file already exists at the destination: hydration is
    /// idempotent, and a file already present in a working directory is
    /// trusted to be the one a prior stage put there.
    pub fn get(&self, handle: &ArtifactHandle, local_path: &Path) -> Result<(), StoreError> {
        if local_path.exists() {
            tracing::trace!(handle = %handle, path = %local_path.display(), "destination present, skipping hydration");
            return Ok(());
        }

        let stored_path = {
            let ledger = self.ledger.lock().expect("store ledger poisoned");
            ledger
                .get(handle)
                .cloned()
                .ok_or_else(|| StoreError::UnknownHandle {
                    handle: handle.clone(),
                })?
        };

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::copy(&stored_path, local_path).map_err(|source| StoreError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;
        tracing::trace!(handle = %handle, path = %local_path.display(), "artifact hydrated");
        Ok(())
    }

    /// Store several files from `dir`, binding each filename's fresh handle
    /// into `map` under `keys`.
    pub fn put_many(
        &self,
        dir: &Path,
        map: &mut ArtifactMap,
        keys: &[ArtifactKey],
    ) -> Result<(), StoreError> {
        for key in keys {
            let handle = self.put(&dir.join(key.filename()))?;
            map.bind(key.clone(), handle)?;
        }
        Ok(())
    }

    /// Materialize several artifacts from `map` into `dir` by key.
    pub fn get_many(
        &self,
        dir: &Path,
        map: &ArtifactMap,
        keys: &[ArtifactKey],
    ) -> Result<(), StoreError> {
        for key in keys {
            let handle = map.require(key)?;
            self.get(handle, &dir.join(key.filename()))?;
        }
        Ok(())
    }

    fn entry_path(&self, handle: &ArtifactHandle) -> PathBuf {
        // Two-level fan-out keeps directory listings bounded.
        let digest = handle.as_str();
        self.root.join(&digest[..2]).join(&digest[2..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_content_gets_distinct_handles() {
        let a = ArtifactHandle::from_digest_bytes(b"one");
        let b = ArtifactHandle::from_digest_bytes(b"two");
        assert_ne!(a, b);
        assert_eq!(a, ArtifactHandle::from_digest_bytes(b"one"));
    }

    #[test]
    fn display_is_shortened() {
        let h = ArtifactHandle::from_digest_bytes(b"x");
        assert_eq!(format!("{h}").len(), 12);
        assert_eq!(h.as_str().len(), 64);
    }
}
