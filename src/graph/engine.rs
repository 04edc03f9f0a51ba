//! The job graph engine: dependency ordering, fan-out/fan-in
//! synchronization, resource-aware admission, and fatal-abort semantics.
//!
//! The engine is a single-owner coordinator: all bookkeeping (ready queue,
//! blocker counts, subtree accounting) lives behind `&mut self`, while job
//! actions run concurrently on tokio tasks and report back through a
//! [`JoinSet`]. That keeps the only state that needs cross-task safety — the
//! artifact store — out of the engine entirely.
//!
//! # Completion model
//!
//! Every node tracks two counters:
//!
//! - `blockers`: unmet prerequisites before the node may be dispatched. A
//!   child has one blocker (its parent's action); a follow-on has one (its
//!   parent's subtree).
//! - `open`: outstanding completions before the node's *subtree* is done:
//!   one for its own action plus one per registered child. When `open` hits
//!   zero the subtree is complete; if a follow-on is registered, subtree
//!   accounting transfers to it so ancestors observe exactly one completion
//!   per branch, after the follow-on's own subtree finishes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

use crate::artifacts::{ArtifactMap, ArtifactStore, MapError};
use crate::events::{Event, EventEmitter};
use crate::types::JobId;

use super::job::{Job, JobContext, JobError, ResourceHint, SpawnRelation, SpawnRequest};
use super::promise::{JobHandle, JobInputs, Promise};

/// Fatal errors surfaced by the engine's run loop.
///
/// The first error halts admission of new nodes; already-running nodes are
/// allowed to finish before the error is returned.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// A stage's action returned an error.
    #[error("stage '{stage}' failed")]
    #[diagnostic(code(germweave::engine::stage_failed))]
    StageFailed {
        stage: String,
        #[source]
        source: JobError,
    },

    /// A consumer was dispatched before its producer fulfilled a promise.
    #[error("stage '{consumer}' dispatched before promise from '{producer}' was fulfilled")]
    #[diagnostic(
        code(germweave::engine::unresolved_promise),
        help("This is an engine bookkeeping bug: dependency edges must gate dispatch.")
    )]
    UnresolvedPromise { consumer: String, producer: String },

    /// A second follow-on was registered on the same node.
    #[error("stage '{stage}' already has a follow-on registered")]
    #[diagnostic(
        code(germweave::engine::duplicate_follow_on),
        help("A node has exactly one follow-on; chain further work on the follow-on itself.")
    )]
    DuplicateFollowOn { stage: String },

    /// An edge was registered on a node whose subtree already completed or
    /// failed.
    #[error("cannot extend stage '{stage}': its subtree is already closed")]
    #[diagnostic(code(germweave::engine::graph_closed))]
    GraphClosed { stage: String },

    /// An edge referenced a job unknown to this engine.
    #[error("unknown job {id}")]
    #[diagnostic(code(germweave::engine::unknown_job))]
    UnknownJob { id: JobId },

    /// A job task panicked or was aborted.
    #[error("job task join error: {0}")]
    #[diagnostic(code(germweave::engine::join))]
    Join(#[from] JoinError),

    /// Merging promised maps into a node's inputs violated bind-once.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Map(#[from] MapError),

    /// Creating or cleaning a node working directory failed.
    #[error("working directory setup failed at {path}: {source}")]
    #[diagnostic(code(germweave::engine::work_dir))]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run drained with nodes still blocked — a malformed graph.
    #[error("run stalled with blocked stages: {stages}")]
    #[diagnostic(
        code(germweave::engine::stalled),
        help("A blocked node's parent was never scheduled; check edge registration.")
    )]
    Stalled { stages: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

struct JobRecord {
    name: String,
    job: Arc<dyn Job>,
    inputs: JobInputs,
    resources: ResourceHint,
    promise: Promise,
    accounting_parent: Option<JobId>,
    children: Vec<JobId>,
    follow_on: Option<JobId>,
    state: JobState,
    blockers: usize,
    open: usize,
    subtree_done: bool,
    work_dir: Option<PathBuf>,
}

type TaskOutcome = (JobId, Result<ArtifactMap, JobError>, Vec<SpawnRequest>);

/// Executes one workflow instance to completion or fatal abort.
///
/// Nodes are registered up front with [`schedule`](Self::schedule) /
/// [`add_child`](Self::add_child) / [`add_follow_on`](Self::add_follow_on),
/// or dynamically by running jobs through their [`JobContext`]. A ready node
/// is dispatched when its blockers have drained and its core hint fits the
/// remaining concurrency budget (a node larger than the whole budget runs
/// alone rather than starving).
///
/// # Examples
///
/// ```no_run
/// use germweave::artifacts::ArtifactStore;
/// use germweave::events::EventBus;
/// use germweave::graph::{JobEngine, JobInputs};
/// use std::path::Path;
///
/// # async fn demo(root_job: impl germweave::graph::Job + 'static) -> miette::Result<()> {
/// let store = ArtifactStore::open(Path::new("/tmp/store"))?;
/// let bus = EventBus::default();
/// bus.listen_for_events();
///
/// let mut engine = JobEngine::new(store, Path::new("/tmp/work"), bus.get_emitter(), 8)?;
/// engine.schedule(root_job, JobInputs::new());
/// engine.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct JobEngine {
    records: FxHashMap<JobId, JobRecord>,
    next_id: u64,
    ready: VecDeque<JobId>,
    store: ArtifactStore,
    work_root: PathBuf,
    emitter: EventEmitter,
    total_cores: u32,
}

impl JobEngine {
    /// Create an engine with a shared store, a root for per-node working
    /// directories, and a total concurrency budget in cores.
    pub fn new(
        store: ArtifactStore,
        work_root: &Path,
        emitter: EventEmitter,
        total_cores: u32,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(work_root).map_err(|source| EngineError::WorkDir {
            path: work_root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            records: FxHashMap::default(),
            next_id: 0,
            ready: VecDeque::new(),
            store,
            work_root: work_root.to_path_buf(),
            emitter,
            total_cores: total_cores.max(1),
        })
    }

    /// Core budget matching the host's available parallelism.
    #[must_use]
    pub fn default_cores() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    /// Register a root node with no prerequisites.
    pub fn schedule(&mut self, job: impl Job + 'static, inputs: JobInputs) -> JobHandle {
        self.register(SpawnRelation::Child, None, Arc::new(job), inputs, None)
            .expect("root registration cannot fail")
    }

    /// Register `job` as a child of `parent`: it runs after the parent's
    /// action returns, unordered relative to its siblings.
    pub fn add_child(
        &mut self,
        parent: &JobHandle,
        job: impl Job + 'static,
        inputs: JobInputs,
    ) -> Result<JobHandle, EngineError> {
        self.register(
            SpawnRelation::Child,
            Some(parent.id()),
            Arc::new(job),
            inputs,
            None,
        )
    }

    /// Register `job` as the follow-on of `parent`: it runs only after the
    /// parent and every node in the parent's subtree have succeeded.
    pub fn add_follow_on(
        &mut self,
        parent: &JobHandle,
        job: impl Job + 'static,
        inputs: JobInputs,
    ) -> Result<JobHandle, EngineError> {
        self.register(
            SpawnRelation::FollowOn,
            Some(parent.id()),
            Arc::new(job),
            inputs,
            None,
        )
    }

    fn register(
        &mut self,
        relation: SpawnRelation,
        parent: Option<JobId>,
        job: Arc<dyn Job>,
        inputs: JobInputs,
        promise: Option<Promise>,
    ) -> Result<JobHandle, EngineError> {
        let id = JobId::new(self.next_id);
        let name = job.name().to_string();
        let resources = job.resources();
        let promise = promise.unwrap_or_else(|| Promise::pending(&name));

        let (blockers, accounting_parent) = match (&relation, parent) {
            (_, None) => (0, None),
            (SpawnRelation::Child, Some(pid)) => {
                let parent_rec = self
                    .records
                    .get_mut(&pid)
                    .ok_or(EngineError::UnknownJob { id: pid })?;
                if parent_rec.subtree_done || parent_rec.state == JobState::Failed {
                    return Err(EngineError::GraphClosed {
                        stage: parent_rec.name.clone(),
                    });
                }
                let blockers = usize::from(parent_rec.state != JobState::Succeeded);
                parent_rec.open += 1;
                parent_rec.children.push(id);
                (blockers, Some(pid))
            }
            (SpawnRelation::FollowOn, Some(pid)) => {
                let parent_acct = {
                    let parent_rec = self
                        .records
                        .get(&pid)
                        .ok_or(EngineError::UnknownJob { id: pid })?;
                    if parent_rec.follow_on.is_some() {
                        return Err(EngineError::DuplicateFollowOn {
                            stage: parent_rec.name.clone(),
                        });
                    }
                    if parent_rec.subtree_done || parent_rec.state == JobState::Failed {
                        return Err(EngineError::GraphClosed {
                            stage: parent_rec.name.clone(),
                        });
                    }
                    parent_rec.accounting_parent
                };
                // Subtree accounting transfers: the follow-on reports to the
                // parent's ancestor once its own subtree finishes.
                self.records
                    .get_mut(&pid)
                    .expect("parent checked above")
                    .follow_on = Some(id);
                (1, parent_acct)
            }
        };

        self.next_id += 1;
        self.records.insert(
            id,
            JobRecord {
                name: name.clone(),
                job,
                inputs,
                resources,
                promise: promise.clone(),
                accounting_parent,
                children: Vec::new(),
                follow_on: None,
                state: JobState::Pending,
                blockers,
                open: 1,
                subtree_done: false,
                work_dir: None,
            },
        );

        self.emitter
            .emit(Event::job(id, name, "schedule", "registered"));
        if blockers == 0 {
            self.ready.push_back(id);
        }
        Ok(JobHandle::new(id, promise))
    }

    /// Drain the graph until every node has completed or the first fatal
    /// failure. On failure, admission halts immediately while nodes already
    /// running finish (best-effort graceful drain), then the error is
    /// returned naming the failing stage.
    #[instrument(skip(self), err)]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
        let mut cores_in_flight = 0u32;
        let mut failure: Option<EngineError> = None;

        loop {
            if failure.is_none()
                && let Err(err) = self.dispatch_ready(&mut join_set, &mut cores_in_flight)
            {
                failure = Some(err);
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Err(join_err) => {
                    tracing::error!(error = %join_err, "job task panicked or was aborted");
                    if failure.is_none() {
                        failure = Some(EngineError::Join(join_err));
                    }
                }
                Ok((id, result, spawned)) => {
                    let cores = self
                        .records
                        .get(&id)
                        .map(|r| r.resources.cores)
                        .unwrap_or(1);
                    cores_in_flight = cores_in_flight.saturating_sub(cores);

                    match result {
                        Ok(output) => {
                            if let Err(err) =
                                self.complete_success(id, output, spawned, failure.is_some())
                                && failure.is_none()
                            {
                                failure = Some(err);
                            }
                        }
                        Err(job_err) => {
                            let stage = self.mark_failed(id, &job_err);
                            if failure.is_none() {
                                failure = Some(EngineError::StageFailed {
                                    stage,
                                    source: job_err,
                                });
                            } else {
                                tracing::error!(stage = %stage, error = %job_err, "additional stage failure during drain");
                            }
                        }
                    }
                }
            }
        }

        if let Some(err) = failure {
            self.emitter
                .emit(Event::diagnostic("run", format!("aborted: {err}")));
            return Err(err);
        }

        let stalled: Vec<&str> = self
            .records
            .values()
            .filter(|r| r.state == JobState::Pending)
            .map(|r| r.name.as_str())
            .collect();
        if !stalled.is_empty() {
            return Err(EngineError::Stalled {
                stages: stalled.join(", "),
            });
        }

        self.emitter.emit(Event::diagnostic("run", "completed"));
        Ok(())
    }

    /// Admit ready nodes that fit the remaining core budget.
    fn dispatch_ready(
        &mut self,
        join_set: &mut JoinSet<TaskOutcome>,
        cores_in_flight: &mut u32,
    ) -> Result<(), EngineError> {
        let mut deferred = VecDeque::new();

        while let Some(id) = self.ready.pop_front() {
            let cores = self.records[&id].resources.cores;
            // An oversized node may run alone; everything else fits the budget.
            let fits = *cores_in_flight + cores <= self.total_cores || *cores_in_flight == 0;
            if !fits {
                deferred.push_back(id);
                continue;
            }

            let inputs = self.resolve_inputs(id)?;
            let work_dir = self.create_work_dir(id)?;

            let record = self.records.get_mut(&id).expect("ready job is registered");
            record.state = JobState::Running;
            record.work_dir = Some(work_dir.clone());
            *cores_in_flight += cores;

            let job = record.job.clone();
            let name = record.name.clone();
            let store = self.store.clone();
            let emitter = self.emitter.clone();

            tracing::debug!(job = %id, stage = %name, cores, "dispatching");
            emitter.emit(Event::job(id, name.clone(), "dispatch", "started"));

            join_set.spawn(async move {
                let mut ctx = JobContext::new(id, name, work_dir, inputs, store, emitter);
                let result = job.run(&mut ctx).await;
                (id, result, ctx.into_spawned())
            });
        }

        self.ready = deferred;
        Ok(())
    }

    /// Merge a node's literal inputs with its resolved promises.
    fn resolve_inputs(&self, id: JobId) -> Result<ArtifactMap, EngineError> {
        let record = &self.records[&id];
        let mut map = record.inputs.base.clone();
        for promise in &record.inputs.promises {
            let resolved = promise
                .try_resolve()
                .ok_or_else(|| EngineError::UnresolvedPromise {
                    consumer: record.name.clone(),
                    producer: promise.producer().to_string(),
                })?;
            map.merge(resolved)?;
        }
        Ok(map)
    }

    fn create_work_dir(&self, id: JobId) -> Result<PathBuf, EngineError> {
        let slug: String = self.records[&id]
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let path = self.work_root.join(format!("{id}-{slug}"));
        std::fs::create_dir_all(&path).map_err(|source| EngineError::WorkDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn complete_success(
        &mut self,
        id: JobId,
        output: ArtifactMap,
        spawned: Vec<SpawnRequest>,
        draining: bool,
    ) -> Result<(), EngineError> {
        {
            let record = self.records.get_mut(&id).expect("completed job registered");
            record.state = JobState::Succeeded;
            record.promise.fulfill(output);
            if let Some(dir) = record.work_dir.take()
                && let Err(err) = std::fs::remove_dir_all(&dir)
            {
                tracing::debug!(path = %dir.display(), error = %err, "leaving working directory behind");
            }
        }
        self.emitter.emit(Event::job(
            id,
            self.records[&id].name.clone(),
            "dispatch",
            "succeeded",
        ));

        if draining {
            if !spawned.is_empty() {
                tracing::debug!(
                    job = %id,
                    count = spawned.len(),
                    "discarding spawned jobs: admission halted after failure"
                );
            }
        } else {
            for request in spawned {
                self.register(
                    request.relation,
                    Some(id),
                    request.job,
                    request.inputs,
                    Some(request.promise),
                )?;
            }
        }

        // The action is done: release body-blocked children, then settle
        // subtree accounting.
        let children = self.records[&id].children.clone();
        for child in children {
            let rec = self.records.get_mut(&child).expect("child registered");
            if rec.blockers > 0 {
                rec.blockers -= 1;
                if rec.blockers == 0 {
                    self.ready.push_back(child);
                }
            }
        }

        let record = self.records.get_mut(&id).expect("completed job registered");
        record.open -= 1;
        if record.open == 0 {
            self.settle_subtree(id);
        }
        Ok(())
    }

    /// Cascade subtree completion: release follow-ons and notify ancestors.
    fn settle_subtree(&mut self, id: JobId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let (follow_on, acct_parent) = {
                let record = self.records.get_mut(&current).expect("settled job registered");
                record.subtree_done = true;
                (record.follow_on, record.accounting_parent)
            };

            if let Some(follow) = follow_on {
                // The follow-on inherits this branch's accounting; ancestors
                // hear about the branch once the follow-on's subtree is done.
                let rec = self.records.get_mut(&follow).expect("follow-on registered");
                if rec.blockers > 0 {
                    rec.blockers -= 1;
                    if rec.blockers == 0 {
                        self.ready.push_back(follow);
                    }
                }
            } else if let Some(parent) = acct_parent {
                let rec = self.records.get_mut(&parent).expect("ancestor registered");
                rec.open -= 1;
                if rec.open == 0 {
                    stack.push(parent);
                }
            }
        }
    }

    fn mark_failed(&mut self, id: JobId, error: &JobError) -> String {
        let record = self.records.get_mut(&id).expect("failed job registered");
        record.state = JobState::Failed;
        let stage = record.name.clone();
        // Working directory is kept on failure for post-mortem inspection.
        self.emitter.emit(Event::job(
            id,
            stage.clone(),
            "dispatch",
            format!("failed: {error}"),
        ));
        stage
    }
}
