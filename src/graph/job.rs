//! Job trait and execution context.
//!
//! A [`Job`] is one unit of work in the pipeline graph: it hydrates named
//! inputs into its private working directory, runs an external tool (or pure
//! bookkeeping), persists outputs, and may spawn children and a follow-on to
//! continue the workflow. Jobs are stateless between runs; everything they
//! need arrives through the [`JobContext`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::artifacts::{ArtifactMap, ArtifactStore, MapError, StageManager, StoreError};
use crate::delivery::DeliveryError;
use crate::events::{Event, EventEmitter};
use crate::fetch::FetchError;
use crate::invoke::InvokeError;
use crate::types::JobId;

use super::promise::{JobInputs, Promise};

/// Advisory resource requirements of one job.
///
/// Core counts constrain engine admission against the run's total concurrency
/// budget; the memory ceiling flows through to the tool invoker. Neither is a
/// hard isolation guarantee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceHint {
    pub cores: u32,
    pub memory_mb: Option<u64>,
}

impl Default for ResourceHint {
    fn default() -> Self {
        Self {
            cores: 1,
            memory_mb: None,
        }
    }
}

impl ResourceHint {
    #[must_use]
    pub fn cores(cores: u32) -> Self {
        Self {
            cores: cores.max(1),
            memory_mb: None,
        }
    }

    #[must_use]
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }
}

/// Core trait for executable pipeline stages.
///
/// # Design
///
/// - **Stateless**: a job owns no mutable state; its working directory and
///   inputs arrive via the context and die with it.
/// - **Continuation-driven**: a job extends the graph by spawning children
///   and at most one follow-on through the context; the engine wires the
///   edges after the action returns.
/// - **Fail loud**: returning `Err` aborts the run. There is no partial
///   success at this layer.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use germweave::artifacts::ArtifactMap;
/// use germweave::graph::{Job, JobContext, JobError};
///
/// struct Passthrough;
///
/// #[async_trait]
/// impl Job for Passthrough {
///     fn name(&self) -> &str {
///         "passthrough"
///     }
///
///     async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
///         Ok(ctx.inputs().clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// Human-readable stage name, used in events and failure reports.
    fn name(&self) -> &str;

    /// Advisory scheduling constraints for this job.
    fn resources(&self) -> ResourceHint {
        ResourceHint::default()
    }

    /// Execute this job. The returned map fulfills the job's promise.
    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError>;
}

pub(crate) enum SpawnRelation {
    Child,
    FollowOn,
}

pub(crate) struct SpawnRequest {
    pub relation: SpawnRelation,
    pub job: Arc<dyn Job>,
    pub inputs: JobInputs,
    pub promise: Promise,
}

/// Execution environment handed to a running job.
///
/// Owns the job's resolved input map and private working directory, provides
/// access to the shared artifact store, and records graph extensions
/// (children / follow-on) for the engine to register once the action returns.
pub struct JobContext {
    job_id: JobId,
    name: String,
    work_dir: PathBuf,
    inputs: ArtifactMap,
    store: ArtifactStore,
    emitter: EventEmitter,
    spawned: Vec<SpawnRequest>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        name: String,
        work_dir: PathBuf,
        inputs: ArtifactMap,
        store: ArtifactStore,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            job_id,
            name,
            work_dir,
            inputs,
            store,
            emitter,
            spawned: Vec::new(),
        }
    }

    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The input map resolved from this job's declared inputs and promises.
    #[must_use]
    pub fn inputs(&self) -> &ArtifactMap {
        &self.inputs
    }

    /// This job's private working directory. Deleted after the job completes;
    /// other jobs see outputs only through the store.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Stage manager bound to this job's working directory.
    #[must_use]
    pub fn stage(&self) -> StageManager {
        StageManager::new(self.store.clone(), &self.work_dir)
    }

    /// Emit a job-scoped progress event.
    pub fn emit(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.emitter
            .emit(Event::job(self.job_id, self.name.clone(), scope, message));
    }

    /// Register a child to run after this job's action returns.
    ///
    /// Returns the promise of the child's output map, typically threaded into
    /// the inputs of a follow-on.
    pub fn add_child(&mut self, job: impl Job + 'static, inputs: JobInputs) -> Promise {
        self.push_spawn(SpawnRelation::Child, Arc::new(job), inputs)
    }

    /// Register the follow-on to run after this job and its whole subtree
    /// have succeeded. A job has at most one follow-on; a second registration
    /// fails the run.
    pub fn add_follow_on(&mut self, job: impl Job + 'static, inputs: JobInputs) -> Promise {
        self.push_spawn(SpawnRelation::FollowOn, Arc::new(job), inputs)
    }

    fn push_spawn(
        &mut self,
        relation: SpawnRelation,
        job: Arc<dyn Job>,
        inputs: JobInputs,
    ) -> Promise {
        let promise = Promise::pending(job.name());
        self.spawned.push(SpawnRequest {
            relation,
            job,
            inputs,
            promise: promise.clone(),
        });
        promise
    }

    pub(crate) fn into_spawned(self) -> Vec<SpawnRequest> {
        self.spawned
    }
}

/// Fatal errors a job action can raise.
///
/// Every variant aborts the run; the engine reports the failing stage by
/// name. Bounded retries live below this layer (the fetcher retries
/// transport errors itself before surfacing [`JobError::Fetch`]).
#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    /// Expected input artifact is missing from the job's map.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(germweave::job::missing_input),
        help("Check that the upstream stage persisted the artifact under this key.")
    )]
    MissingInput { what: String },

    /// A source URL could not be retrieved after bounded retries.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    /// An external tool invocation failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Invocation(#[from] InvokeError),

    /// Artifact store interaction failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// Artifact map bookkeeping failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Map(#[from] MapError),

    /// Placing a finished artifact at its destination failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Delivery(#[from] DeliveryError),

    /// Filesystem failure inside the working directory.
    #[error("working directory I/O failure on {path}: {source}")]
    #[diagnostic(code(germweave::job::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
