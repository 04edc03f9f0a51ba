//! Forward references to job outputs.

use std::sync::{Arc, OnceLock};

use crate::artifacts::{ArtifactHandle, ArtifactKey, ArtifactMap};
use crate::types::JobId;

/// A forward reference to a job's future output map.
///
/// A promise is minted when its producing job is registered and fulfilled by
/// the engine once that job's action returns. Consumers hand promises to
/// [`JobInputs`]; the engine resolves them at dispatch time, after the
/// dependency edges guarantee the producer has run. Application code never
/// reads a promise directly.
#[derive(Clone, Debug)]
pub struct Promise {
    producer: Arc<str>,
    cell: Arc<OnceLock<ArtifactMap>>,
}

impl Promise {
    pub(crate) fn pending(producer: &str) -> Self {
        Self {
            producer: Arc::from(producer),
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Display name of the job that will fulfill this promise.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub(crate) fn fulfill(&self, map: ArtifactMap) {
        // A promise is fulfilled exactly once, by the engine.
        let _ = self.cell.set(map);
    }

    pub(crate) fn try_resolve(&self) -> Option<&ArtifactMap> {
        self.cell.get()
    }
}

/// Declared inputs of a job: a literal base map plus promises from upstream
/// producers, merged by the engine at dispatch time under bind-once
/// semantics.
///
/// # Examples
///
/// ```
/// use germweave::artifacts::{ArtifactKey, ArtifactHandle, ArtifactMap};
/// use germweave::graph::JobInputs;
///
/// let refs = ArtifactMap::new().with(
///     ArtifactKey::shared("ref.fa"),
///     ArtifactHandle::from_digest_bytes(b"ACGT"),
/// );
/// let inputs = JobInputs::from_map(refs);
/// ```
#[derive(Clone, Debug, Default)]
pub struct JobInputs {
    pub(crate) base: ArtifactMap,
    pub(crate) promises: Vec<Promise>,
}

impl JobInputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs seeded from an already resolved map.
    #[must_use]
    pub fn from_map(map: ArtifactMap) -> Self {
        Self {
            base: map,
            promises: Vec::new(),
        }
    }

    /// Add a single literal entry.
    #[must_use]
    pub fn with_entry(mut self, key: ArtifactKey, handle: ArtifactHandle) -> Self {
        self.base = self.base.with(key, handle);
        self
    }

    /// Add a promise whose map will be merged in at dispatch.
    #[must_use]
    pub fn with_promise(mut self, promise: Promise) -> Self {
        self.promises.push(promise);
        self
    }

    #[must_use]
    pub fn promise_count(&self) -> usize {
        self.promises.len()
    }
}

/// Handle to a job registered on the engine.
///
/// Carries the job's id (for edge registration) and the promise of its
/// eventual output map (for wiring downstream inputs).
#[derive(Clone, Debug)]
pub struct JobHandle {
    id: JobId,
    promise: Promise,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, promise: Promise) -> Self {
        Self { id, promise }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Promise of this job's output map.
    #[must_use]
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }
}
