//! The named artifact map threaded through the job graph.
//!
//! An [`ArtifactMap`] is each node's working set: an ordered mapping from a
//! logical [`ArtifactKey`] to the [`ArtifactHandle`] currently bound to it.
//! Keys separate the *identity* of an artifact from its on-disk filename so
//! that independent samples can both produce a `sample.bam` without their
//! ledger entries colliding; isolation comes from qualified keys and separate
//! working directories, not from filename uniqueness.

use indexmap::IndexMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::store::ArtifactHandle;

/// Logical name of an artifact within one workflow run.
///
/// A key couples an on-disk filename with an optional sample qualifier.
/// Shared reference data (`ref.fa`, truth-set VCFs) uses unqualified keys;
/// per-sample intermediates qualify the same filenames by sample id.
///
/// # Examples
///
/// ```
/// use germweave::artifacts::ArtifactKey;
///
/// let shared = ArtifactKey::shared("ref.fa");
/// let per_sample = ArtifactKey::sample("S1", "sample.bam");
///
/// assert_eq!(shared.filename(), "ref.fa");
/// assert_eq!(per_sample.filename(), "sample.bam");
/// assert_ne!(shared, ArtifactKey::sample("S1", "ref.fa"));
/// assert_eq!(format!("{per_sample}"), "S1:sample.bam");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    qualifier: Option<String>,
    filename: String,
}

impl ArtifactKey {
    /// A key for run-wide shared data, keyed by filename alone.
    #[must_use]
    pub fn shared(filename: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            filename: filename.into(),
        }
    }

    /// A key qualified by sample id, so per-sample filenames never collide
    /// across branches.
    #[must_use]
    pub fn sample(sample_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            qualifier: Some(sample_id.into()),
            filename: filename.into(),
        }
    }

    /// The filename this artifact takes inside a working directory.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The sample qualifier, if this is per-sample data.
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}:{}", self.filename),
            None => write!(f, "{}", self.filename),
        }
    }
}

/// Errors raised by artifact map bookkeeping.
#[derive(Debug, Error, Diagnostic)]
pub enum MapError {
    /// A key already bound to one handle was bound again to a different one.
    #[error("artifact key {key} already bound to {existing}, refusing rebind to {incoming}")]
    #[diagnostic(
        code(germweave::artifacts::rebind),
        help("Derived artifacts get a fresh key; within one lineage a key is bound exactly once.")
    )]
    Rebind {
        key: String,
        existing: ArtifactHandle,
        incoming: ArtifactHandle,
    },

    /// A lookup was performed for a key this map has never seen.
    #[error("artifact key {key} is not present in this map")]
    #[diagnostic(
        code(germweave::artifacts::missing_key),
        help("Check that the producing stage persisted the artifact before it was requested.")
    )]
    MissingKey { key: String },
}

/// Ordered mapping from [`ArtifactKey`] to [`ArtifactHandle`].
///
/// Insertion order is preserved, which keeps staging and event output
/// deterministic across runs. Binding is write-once per key: a key may be
/// re-bound to the *same* handle (a no-op, common when maps from sibling
/// branches merge) but never to a different one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMap {
    entries: IndexMap<ArtifactKey, ArtifactHandle>,
}

impl ArtifactMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `handle`.
    ///
    /// Re-binding the identical handle is accepted; binding a different
    /// handle to an already bound key is a [`MapError::Rebind`].
    pub fn bind(&mut self, key: ArtifactKey, handle: ArtifactHandle) -> Result<(), MapError> {
        match self.entries.get(&key) {
            Some(existing) if *existing == handle => Ok(()),
            Some(existing) => Err(MapError::Rebind {
                key: key.to_string(),
                existing: existing.clone(),
                incoming: handle,
            }),
            None => {
                self.entries.insert(key, handle);
                Ok(())
            }
        }
    }

    /// Builder-style [`bind`](Self::bind) that panics on rebind.
    ///
    /// Intended for constructing literal maps in wiring code and tests where
    /// the keys are statically distinct.
    #[must_use]
    pub fn with(mut self, key: ArtifactKey, handle: ArtifactHandle) -> Self {
        self.bind(key, handle)
            .expect("literal artifact maps use distinct keys");
        self
    }

    #[must_use]
    pub fn get(&self, key: &ArtifactKey) -> Option<&ArtifactHandle> {
        self.entries.get(key)
    }

    /// Look up a key, failing loudly when absent.
    pub fn require(&self, key: &ArtifactKey) -> Result<&ArtifactHandle, MapError> {
        self.get(key).ok_or_else(|| MapError::MissingKey {
            key: key.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactKey, &ArtifactHandle)> {
        self.entries.iter()
    }

    /// Union `other` into `self` under bind-once semantics.
    ///
    /// Entries already present with the same handle are skipped; a key bound
    /// to a different handle in `other` is a rebind error, surfacing lineage
    /// bugs instead of silently overwriting.
    pub fn merge(&mut self, other: &ArtifactMap) -> Result<(), MapError> {
        for (key, handle) in other.iter() {
            self.bind(key.clone(), handle.clone())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ArtifactMap {
    type Item = (&'a ArtifactKey, &'a ArtifactHandle);
    type IntoIter = indexmap::map::Iter<'a, ArtifactKey, ArtifactHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(tag: &str) -> ArtifactHandle {
        ArtifactHandle::from_digest_bytes(tag.as_bytes())
    }

    #[test]
    fn bind_is_write_once() {
        let mut map = ArtifactMap::new();
        let key = ArtifactKey::shared("ref.fa");
        map.bind(key.clone(), handle("a")).unwrap();
        // Identical rebind is a no-op.
        map.bind(key.clone(), handle("a")).unwrap();
        let err = map.bind(key, handle("b")).unwrap_err();
        assert!(matches!(err, MapError::Rebind { .. }));
    }

    #[test]
    fn merge_preserves_order_and_rejects_conflicts() {
        let mut left = ArtifactMap::new()
            .with(ArtifactKey::shared("ref.fa"), handle("ref"))
            .with(ArtifactKey::shared("ref.fa.fai"), handle("fai"));
        let right = ArtifactMap::new()
            .with(ArtifactKey::shared("ref.fa"), handle("ref"))
            .with(ArtifactKey::sample("S1", "sample.bam"), handle("bam"));
        left.merge(&right).unwrap();

        let keys: Vec<String> = left.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["ref.fa", "ref.fa.fai", "S1:sample.bam"]);

        let conflicting = ArtifactMap::new().with(ArtifactKey::shared("ref.fa"), handle("other"));
        assert!(left.merge(&conflicting).is_err());
    }

    #[test]
    fn qualified_keys_do_not_collide() {
        let mut map = ArtifactMap::new();
        map.bind(ArtifactKey::sample("S1", "sample.bam"), handle("one"))
            .unwrap();
        map.bind(ArtifactKey::sample("S2", "sample.bam"), handle("two"))
            .unwrap();
        assert_eq!(map.len(), 2);
    }
}
