use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use germweave::artifacts::{ArtifactKey, ArtifactMap};
use germweave::graph::{Job, JobContext, JobError, JobInputs, ResourceHint};

/// Shared record of job completion order.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of `name` in the completion order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == name)
    }
}

/// Sleeps, records its name, and passes its inputs through.
#[derive(Clone)]
pub struct RecordingJob {
    pub name: String,
    pub log: ExecutionLog,
    pub delay: Duration,
    pub hint: ResourceHint,
}

impl RecordingJob {
    pub fn new(name: impl Into<String>, log: ExecutionLog) -> Self {
        Self {
            name: name.into(),
            log,
            delay: Duration::ZERO,
            hint: ResourceHint::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_hint(mut self, hint: ResourceHint) -> Self {
        self.hint = hint;
        self
    }
}

#[async_trait]
impl Job for RecordingJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> ResourceHint {
        self.hint
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.push(self.name.clone());
        Ok(ctx.inputs().clone())
    }
}

/// Fails after an optional delay.
pub struct FailingJob {
    pub name: String,
    pub delay: Duration,
}

impl FailingJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Job for FailingJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(JobError::MissingInput {
            what: "injected failure".to_string(),
        })
    }
}

/// Produces a single literal artifact entry without touching the store.
pub struct ProducerJob {
    pub name: String,
    pub key: ArtifactKey,
    pub content: &'static [u8],
}

#[async_trait]
impl Job for ProducerJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let path = ctx.work_dir().join(self.key.filename());
        std::fs::write(&path, self.content).map_err(|source| JobError::Io {
            path: path.clone(),
            source,
        })?;
        let handle = ctx.store().put(&path)?;
        let mut map = ArtifactMap::new();
        map.bind(self.key.clone(), handle)?;
        Ok(map)
    }
}

/// Records its name only if the expected key arrived in its inputs.
pub struct ExpectKeyJob {
    pub name: String,
    pub key: ArtifactKey,
    pub log: ExecutionLog,
}

#[async_trait]
impl Job for ExpectKeyJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        ctx.inputs().require(&self.key)?;
        self.log.push(self.name.clone());
        Ok(ctx.inputs().clone())
    }
}

/// Spawns a dynamic child and follow-on from inside its own action.
pub struct DynamicSpawner {
    pub name: String,
    pub log: ExecutionLog,
}

#[async_trait]
impl Job for DynamicSpawner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        self.log.push(self.name.clone());
        let child = ctx.add_child(
            RecordingJob::new(format!("{}-child", self.name), self.log.clone()),
            JobInputs::new(),
        );
        ctx.add_follow_on(
            RecordingJob::new(format!("{}-follow", self.name), self.log.clone()),
            JobInputs::new().with_promise(child),
        );
        Ok(ArtifactMap::new())
    }
}

/// Tracks how many cores' worth of probes run concurrently, for admission
/// tests.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current_cores: AtomicU32,
    max_cores: AtomicU32,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn max_cores_seen(&self) -> u32 {
        self.max_cores.load(Ordering::SeqCst)
    }

    fn enter(&self, cores: u32) {
        let now = self.current_cores.fetch_add(cores, Ordering::SeqCst) + cores;
        self.max_cores.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, cores: u32) {
        self.current_cores.fetch_sub(cores, Ordering::SeqCst);
    }
}

/// Holds probe cores for a fixed interval, weighted by its core hint.
pub struct ProbeJob {
    pub name: String,
    pub probe: Arc<ConcurrencyProbe>,
    pub cores: u32,
    pub hold: Duration,
}

#[async_trait]
impl Job for ProbeJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> ResourceHint {
        ResourceHint::cores(self.cores)
    }

    async fn run(&self, _ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        self.probe.enter(self.cores);
        tokio::time::sleep(self.hold).await;
        self.probe.exit(self.cores);
        Ok(ArtifactMap::new())
    }
}
