//! Shared reference preparation: download, index, sequence dictionary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{ArtifactKey, ArtifactMap};
use crate::graph::{Job, JobContext, JobError, JobInputs, ResourceHint};
use crate::invoke::Invocation;
use crate::manifest::SampleDescriptor;

use super::{
    DBSNP_VCF, FetchArtifact, HAPMAP_VCF, MILLS_VCF, OMNI_VCF, PHASE_VCF, PICARD_IMAGE,
    PipelineDeps, REF_DICT, REF_FA, REF_FAI, SAMTOOLS_IMAGE, sample::FanOutSamples,
};

/// Root of the workflow: fans out one download child per shared reference
/// artifact, then follows on into reference indexing once all of them have
/// landed in the store.
pub struct PrepareRun {
    deps: Arc<PipelineDeps>,
    samples: Vec<SampleDescriptor>,
}

impl PrepareRun {
    pub fn new(deps: Arc<PipelineDeps>, samples: Vec<SampleDescriptor>) -> Self {
        Self { deps, samples }
    }
}

#[async_trait]
impl Job for PrepareRun {
    fn name(&self) -> &str {
        "prepare-run"
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let downloads = [
            (REF_FA, self.deps.config.ref_genome.clone()),
            (PHASE_VCF, self.deps.config.phase.clone()),
            (OMNI_VCF, self.deps.config.omni.clone()),
            (DBSNP_VCF, self.deps.config.dbsnp.clone()),
            (HAPMAP_VCF, self.deps.config.hapmap.clone()),
            (MILLS_VCF, self.deps.config.mills.clone()),
        ];

        let mut follow_inputs = JobInputs::new();
        for (filename, url) in downloads {
            let promise = ctx.add_child(
                FetchArtifact::new(self.deps.clone(), url, ArtifactKey::shared(filename)),
                JobInputs::new(),
            );
            follow_inputs = follow_inputs.with_promise(promise);
        }

        ctx.emit("plan", format!("{} samples queued", self.samples.len()));
        ctx.add_follow_on(
            IndexReference::new(self.deps.clone(), self.samples.clone()),
            follow_inputs,
        );
        Ok(ArtifactMap::new())
    }
}

/// Builds the `.fai` index for the reference genome with samtools, then
/// chains into sequence-dictionary creation.
pub struct IndexReference {
    deps: Arc<PipelineDeps>,
    samples: Vec<SampleDescriptor>,
}

impl IndexReference {
    pub fn new(deps: Arc<PipelineDeps>, samples: Vec<SampleDescriptor>) -> Self {
        Self { deps, samples }
    }
}

#[async_trait]
impl Job for IndexReference {
    fn name(&self) -> &str {
        "index-reference"
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();
        stage.hydrate(&map, &[ArtifactKey::shared(REF_FA)])?;

        let invocation = Invocation::new(
            SAMTOOLS_IMAGE,
            vec!["faidx".into(), REF_FA.into()],
        )
        .with_inputs([REF_FA])
        .with_outputs([REF_FAI]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        stage.persist(&mut map, &[ArtifactKey::shared(REF_FAI)])?;
        ctx.add_child(
            BuildReferenceDict::new(self.deps.clone(), self.samples.clone()),
            JobInputs::from_map(map.clone()),
        );
        Ok(map)
    }
}

/// Creates the picard sequence dictionary for the reference, then fans out
/// per-sample sub-graphs.
pub struct BuildReferenceDict {
    deps: Arc<PipelineDeps>,
    samples: Vec<SampleDescriptor>,
}

impl BuildReferenceDict {
    pub fn new(deps: Arc<PipelineDeps>, samples: Vec<SampleDescriptor>) -> Self {
        Self { deps, samples }
    }
}

#[async_trait]
impl Job for BuildReferenceDict {
    fn name(&self) -> &str {
        "reference-dict"
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();
        stage.hydrate(&map, &[ArtifactKey::shared(REF_FA)])?;

        let invocation = Invocation::new(
            PICARD_IMAGE,
            vec![
                "CreateSequenceDictionary".into(),
                format!("R={REF_FA}"),
                format!("O={REF_DICT}"),
            ],
        )
        .with_limits(ResourceHint::default().with_memory_mb(self.deps.config.memory_mb))
        .with_inputs([REF_FA])
        .with_outputs([REF_DICT]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        stage.persist(&mut map, &[ArtifactKey::shared(REF_DICT)])?;
        ctx.add_child(
            FanOutSamples::new(self.deps.clone(), self.samples.clone()),
            JobInputs::from_map(map.clone()),
        );
        Ok(map)
    }
}
