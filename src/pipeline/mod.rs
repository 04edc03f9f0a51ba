//! The germline variant-calling workflow itself: the graph instance the
//! engine executes.
//!
//! Stage order per run:
//!
//! ```text
//! prepare-run ─┬─ fetch ref.fa            (children, parallel)
//!              ├─ fetch phase.vcf …
//!              └─ follow-on: index-reference → reference-dict → fan-out
//!                  fan-out ─ one sub-graph per sample:
//!                    setup → [index] → haplotype-caller → genotype
//!                      genotype ─┬─ vqsr-snp   → apply-vqsr-snp   → sink
//!                                └─ vqsr-indel → apply-vqsr-indel → sink
//! ```
//!
//! The two recalibration branches are independent children of the genotype
//! node; they never reconverge, and the run is complete when both have
//! separately reached their sink.

pub mod calling;
pub mod recalibration;
pub mod reference;
pub mod sample;

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{ArtifactKey, ArtifactMap};
use crate::config::{PipelineConfig, RunContext};
use crate::delivery::OutputSink;
use crate::fetch::Fetcher;
use crate::graph::{Job, JobContext, JobError, JobEngine, JobHandle, JobInputs};
use crate::invoke::ToolInvoker;

/// Container images the stages invoke.
pub(crate) const SAMTOOLS_IMAGE: &str = "quay.io/ucsc_cgl/samtools";
pub(crate) const PICARD_IMAGE: &str = "quay.io/ucsc_cgl/picardtools";
pub(crate) const GATK_IMAGE: &str =
    "quay.io/ucsc_cgl/gatk:3.5--dba6dae49156168a909c43330350c6161dc7ecc2";

/// Shared reference filenames, keyed unqualified.
pub(crate) const REF_FA: &str = "ref.fa";
pub(crate) const REF_FAI: &str = "ref.fa.fai";
pub(crate) const REF_DICT: &str = "ref.dict";
pub(crate) const PHASE_VCF: &str = "phase.vcf";
pub(crate) const OMNI_VCF: &str = "omni.vcf";
pub(crate) const DBSNP_VCF: &str = "dbsnp.vcf";
pub(crate) const HAPMAP_VCF: &str = "hapmap.vcf";
pub(crate) const MILLS_VCF: &str = "mills.vcf";

/// Per-sample working filenames; isolation comes from qualified keys and
/// separate working directories, not from these names.
pub(crate) const SAMPLE_BAM: &str = "sample.bam";
pub(crate) const SAMPLE_BAI: &str = "sample.bam.bai";
pub(crate) const UNIFIED_VCF: &str = "unified.raw.BOTH.gatk.vcf";

pub(crate) fn ref_keys() -> [ArtifactKey; 3] {
    [
        ArtifactKey::shared(REF_FA),
        ArtifactKey::shared(REF_FAI),
        ArtifactKey::shared(REF_DICT),
    ]
}

/// Everything stage jobs need besides their artifact map: immutable
/// configuration, the per-run context, and the external collaborators.
pub struct PipelineDeps {
    pub config: PipelineConfig,
    pub run: RunContext,
    pub fetcher: Arc<dyn Fetcher>,
    pub invoker: Arc<dyn ToolInvoker>,
    pub delivery: Arc<dyn OutputSink>,
}

/// Register the whole workflow on `engine`, rooted at the reference
/// preamble. Samples are expanded from the run context before anything is
/// scheduled, so manifest problems surface as configuration-time errors.
pub fn build(
    engine: &mut JobEngine,
    deps: Arc<PipelineDeps>,
) -> Result<JobHandle, crate::manifest::ManifestError> {
    let samples = deps.run.samples.expand()?;
    let root = engine.schedule(
        reference::PrepareRun::new(deps, samples),
        JobInputs::new(),
    );
    Ok(root)
}

/// Downloads one URL and binds it into the store under a fixed key.
///
/// Used for the shared reference data and for per-sample BAM (and `.bai`)
/// acquisition; the key's qualifier decides which.
pub struct FetchArtifact {
    name: String,
    deps: Arc<PipelineDeps>,
    url: String,
    key: ArtifactKey,
}

impl FetchArtifact {
    pub fn new(deps: Arc<PipelineDeps>, url: impl Into<String>, key: ArtifactKey) -> Self {
        Self {
            name: format!("fetch-{key}"),
            deps,
            url: url.into(),
            key,
        }
    }
}

#[async_trait]
impl Job for FetchArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let dest = ctx.work_dir().join(self.key.filename());
        ctx.emit("fetch", format!("retrieving {}", self.url));
        self.deps.fetcher.fetch(&self.url, &dest).await?;
        let handle = ctx.store().put(&dest)?;
        let mut map = ArtifactMap::new();
        map.bind(self.key.clone(), handle)?;
        Ok(map)
    }
}
