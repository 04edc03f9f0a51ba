//! Per-sample fan-out and sample preparation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{ArtifactKey, ArtifactMap};
use crate::graph::{Job, JobContext, JobError, JobInputs};
use crate::invoke::Invocation;
use crate::manifest::SampleDescriptor;

use super::{
    FetchArtifact, PipelineDeps, SAMPLE_BAI, SAMPLE_BAM, SAMTOOLS_IMAGE,
    calling::CallVariants,
};

/// Fans one independent sub-graph out per sample.
///
/// Every sample shares the reference handles already resolved upstream but
/// owns its own sample-qualified keys from here on; siblings run unordered
/// and isolated.
pub struct FanOutSamples {
    deps: Arc<PipelineDeps>,
    samples: Vec<SampleDescriptor>,
}

impl FanOutSamples {
    pub fn new(deps: Arc<PipelineDeps>, samples: Vec<SampleDescriptor>) -> Self {
        Self { deps, samples }
    }
}

#[async_trait]
impl Job for FanOutSamples {
    fn name(&self) -> &str {
        "fan-out-samples"
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        for sample in &self.samples {
            ctx.emit("fan-out", format!("scheduling sample {}", sample.uuid));
            ctx.add_child(
                SampleSetup::new(self.deps.clone(), sample.clone()),
                JobInputs::from_map(ctx.inputs().clone()),
            );
        }
        Ok(ctx.inputs().clone())
    }
}

/// Acquires one sample's BAM (and index, when already available) and chains
/// into variant calling.
///
/// When the configuration marks inputs as pre-indexed, the `.bai` is fetched
/// from the sibling URL and indexing is skipped; otherwise an indexing node
/// is inserted ahead of the caller.
pub struct SampleSetup {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
}

impl SampleSetup {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor) -> Self {
        Self {
            name: format!("setup-{}", sample.uuid),
            deps,
            sample,
        }
    }
}

#[async_trait]
impl Job for SampleSetup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let uuid = &self.sample.uuid;
        let bam_key = ArtifactKey::sample(uuid, SAMPLE_BAM);

        let bam_promise = ctx.add_child(
            FetchArtifact::new(self.deps.clone(), &self.sample.url, bam_key),
            JobInputs::new(),
        );
        let mut follow_inputs = JobInputs::from_map(ctx.inputs().clone()).with_promise(bam_promise);

        if self.deps.config.indexed {
            let bai_promise = ctx.add_child(
                FetchArtifact::new(
                    self.deps.clone(),
                    format!("{}.bai", self.sample.url),
                    ArtifactKey::sample(uuid, SAMPLE_BAI),
                ),
                JobInputs::new(),
            );
            follow_inputs = follow_inputs.with_promise(bai_promise);
            ctx.add_follow_on(
                CallVariants::new(self.deps.clone(), self.sample.clone()),
                follow_inputs,
            );
        } else {
            ctx.add_follow_on(
                IndexSample::new(self.deps.clone(), self.sample.clone()),
                follow_inputs,
            );
        }
        Ok(ctx.inputs().clone())
    }
}

/// Indexes a sample BAM with samtools, then chains into variant calling.
pub struct IndexSample {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
}

impl IndexSample {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor) -> Self {
        Self {
            name: format!("index-{}", sample.uuid),
            deps,
            sample,
        }
    }
}

#[async_trait]
impl Job for IndexSample {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let uuid = &self.sample.uuid;
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();
        stage.hydrate(&map, &[ArtifactKey::sample(uuid, SAMPLE_BAM)])?;

        let invocation = Invocation::new(
            SAMTOOLS_IMAGE,
            vec!["index".into(), SAMPLE_BAM.into()],
        )
        .with_inputs([SAMPLE_BAM])
        .with_outputs([SAMPLE_BAI]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        stage.persist(&mut map, &[ArtifactKey::sample(uuid, SAMPLE_BAI)])?;
        ctx.add_child(
            CallVariants::new(self.deps.clone(), self.sample.clone()),
            JobInputs::from_map(map.clone()),
        );
        Ok(map)
    }
}
