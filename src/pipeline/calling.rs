//! Variant calling and joint genotyping stages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{ArtifactKey, ArtifactMap};
use crate::graph::{Job, JobContext, JobError, JobInputs, ResourceHint};
use crate::invoke::Invocation;
use crate::manifest::SampleDescriptor;

use super::recalibration::{ApplyMode, RecalibrateVariants};
use super::{GATK_IMAGE, PipelineDeps, REF_FA, SAMPLE_BAI, SAMPLE_BAM, UNIFIED_VCF, ref_keys};

pub(crate) fn gvcf_filename(uuid: &str, suffix: &str) -> String {
    format!("{uuid}.raw.BOTH{suffix}.gvcf")
}

/// GATK HaplotypeCaller in gVCF discovery mode.
///
/// The emitted gVCF is persisted for the genotyper and also delivered to the
/// output sink immediately, so partial progress survives inspection even
/// though a later failure aborts the run.
pub struct CallVariants {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
}

impl CallVariants {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor) -> Self {
        Self {
            name: format!("haplotype-caller-{}", sample.uuid),
            deps,
            sample,
        }
    }
}

#[async_trait]
impl Job for CallVariants {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> ResourceHint {
        ResourceHint::cores(self.deps.config.effective_cores())
            .with_memory_mb(self.deps.config.memory_mb)
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let uuid = &self.sample.uuid;
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();

        let mut hydrate_keys = ref_keys().to_vec();
        hydrate_keys.push(ArtifactKey::sample(uuid, SAMPLE_BAM));
        hydrate_keys.push(ArtifactKey::sample(uuid, SAMPLE_BAI));
        stage.hydrate(&map, &hydrate_keys)?;

        let output = gvcf_filename(uuid, &self.deps.run.suffix);
        let cores = self.resources().cores;
        let invocation = Invocation::new(
            GATK_IMAGE,
            vec![
                "-T".into(),
                "HaplotypeCaller".into(),
                "-nct".into(),
                cores.to_string(),
                "-R".into(),
                REF_FA.into(),
                "--genotyping_mode".into(),
                "Discovery".into(),
                "--emitRefConfidence".into(),
                "GVCF".into(),
                "-I".into(),
                SAMPLE_BAM.into(),
                "-o".into(),
                output.clone(),
                "-variant_index_type".into(),
                "LINEAR".into(),
                "-variant_index_parameter".into(),
                "128000".into(),
                "--annotation".into(),
                "QualByDepth".into(),
                "--annotation".into(),
                "DepthPerSampleHC".into(),
                "--annotation".into(),
                "FisherStrand".into(),
                "--annotation".into(),
                "ReadPosRankSumTest".into(),
            ],
        )
        .with_limits(self.resources())
        .with_inputs(hydrate_keys.iter().map(|k| k.filename().to_string()))
        .with_outputs([output.clone()]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        let gvcf_key = ArtifactKey::sample(uuid, &output);
        stage.persist(&mut map, &[gvcf_key.clone()])?;

        ctx.emit("deliver", format!("placing {output}"));
        self.deps
            .delivery
            .place(&stage.path_of(&gvcf_key), &self.deps.run.destination)
            .await?;

        ctx.add_child(
            GenotypeGvcf::new(self.deps.clone(), self.sample.clone()),
            JobInputs::from_map(map.clone()),
        );
        Ok(map)
    }
}

/// GATK GenotypeGVCFs over the per-sample gVCF, fanning out into the two
/// independent recalibration branches.
pub struct GenotypeGvcf {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
}

impl GenotypeGvcf {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor) -> Self {
        Self {
            name: format!("genotype-gvcfs-{}", sample.uuid),
            deps,
            sample,
        }
    }
}

#[async_trait]
impl Job for GenotypeGvcf {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> ResourceHint {
        ResourceHint::cores(self.deps.config.effective_cores())
            .with_memory_mb(self.deps.config.memory_mb)
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let uuid = &self.sample.uuid;
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();

        let gvcf = gvcf_filename(uuid, &self.deps.run.suffix);
        let mut hydrate_keys = ref_keys().to_vec();
        hydrate_keys.push(ArtifactKey::sample(uuid, &gvcf));
        stage.hydrate(&map, &hydrate_keys)?;

        let cores = self.resources().cores;
        let invocation = Invocation::new(
            GATK_IMAGE,
            vec![
                "-T".into(),
                "GenotypeGVCFs".into(),
                "-nt".into(),
                cores.to_string(),
                "-R".into(),
                REF_FA.into(),
                "--variant".into(),
                gvcf,
                "--out".into(),
                UNIFIED_VCF.into(),
                "-stand_emit_conf".into(),
                "10.0".into(),
                "-stand_call_conf".into(),
                "30.0".into(),
            ],
        )
        .with_limits(self.resources())
        .with_inputs(hydrate_keys.iter().map(|k| k.filename().to_string()))
        .with_outputs([UNIFIED_VCF]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        stage.persist(&mut map, &[ArtifactKey::sample(uuid, UNIFIED_VCF)])?;

        // Fan-out: the SNP and Indel branches are independent siblings and
        // never reconverge.
        for mode in [ApplyMode::Snp, ApplyMode::Indel] {
            ctx.add_child(
                RecalibrateVariants::new(self.deps.clone(), self.sample.clone(), mode),
                JobInputs::from_map(map.clone()),
            );
        }
        Ok(map)
    }
}
