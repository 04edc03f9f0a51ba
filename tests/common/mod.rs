#![allow(dead_code)]

pub mod jobs;

#[allow(unused_imports)]
pub use jobs::*;

use germweave::artifacts::ArtifactStore;
use germweave::events::{EventBus, MemorySink};
use germweave::graph::JobEngine;
use tempfile::TempDir;

/// Engine plus the scaffolding its run needs, rooted in scratch directories
/// that live as long as the harness.
pub struct Harness {
    pub engine: JobEngine,
    pub bus: EventBus,
    pub sink: MemorySink,
    pub store: ArtifactStore,
    _scratch: TempDir,
}

impl Harness {
    pub fn new(total_cores: u32) -> Self {
        let scratch = TempDir::new().expect("scratch dir");
        let store = ArtifactStore::open(&scratch.path().join("store")).expect("store");
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        let engine = JobEngine::new(
            store.clone(),
            &scratch.path().join("work"),
            bus.get_emitter(),
            total_cores,
        )
        .expect("engine");
        Self {
            engine,
            bus,
            sink,
            store,
            _scratch: scratch,
        }
    }
}
