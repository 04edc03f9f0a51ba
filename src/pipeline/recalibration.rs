//! Variant quality score recalibration: separate models for SNPs and
//! Indels, each applied and delivered on its own terminal branch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{ArtifactKey, ArtifactMap};
use crate::graph::{Job, JobContext, JobError, JobInputs, ResourceHint};
use crate::invoke::Invocation;
use crate::manifest::SampleDescriptor;

use super::{
    DBSNP_VCF, GATK_IMAGE, HAPMAP_VCF, MILLS_VCF, OMNI_VCF, PHASE_VCF, PipelineDeps, REF_FA,
    UNIFIED_VCF, ref_keys,
};

/// Which recalibration model a branch trains and applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    Snp,
    Indel,
}

impl ApplyMode {
    /// GATK `-mode` argument.
    pub(crate) fn gatk_mode(self) -> &'static str {
        match self {
            ApplyMode::Snp => "SNP",
            ApplyMode::Indel => "INDEL",
        }
    }

    fn file_tag(self) -> &'static str {
        match self {
            ApplyMode::Snp => "HAPSNP",
            ApplyMode::Indel => "HAPINDEL",
        }
    }

    fn slug(self) -> &'static str {
        match self {
            ApplyMode::Snp => "snp",
            ApplyMode::Indel => "indel",
        }
    }

    fn recal_file(self) -> String {
        format!("{}.recal", self.file_tag())
    }

    fn tranches_file(self) -> String {
        format!("{}.tranches", self.file_tag())
    }

    fn plots_file(self) -> String {
        format!("{}.plots", self.file_tag())
    }

    /// Truth-set filenames this model trains on.
    fn truth_sets(self) -> &'static [&'static str] {
        match self {
            ApplyMode::Snp => &[HAPMAP_VCF, OMNI_VCF, DBSNP_VCF, PHASE_VCF],
            ApplyMode::Indel => &[MILLS_VCF],
        }
    }

    /// GATK resource/annotation arguments for this model.
    fn model_args(self) -> Vec<String> {
        match self {
            ApplyMode::Snp => vec![
                "-resource:hapmap,known=false,training=true,truth=true,prior=15.0".into(),
                HAPMAP_VCF.into(),
                "-resource:omni,known=false,training=true,truth=false,prior=12.0".into(),
                OMNI_VCF.into(),
                "-resource:dbsnp,known=true,training=false,truth=false,prior=2.0".into(),
                DBSNP_VCF.into(),
                "-resource:1000G,known=false,training=true,truth=false,prior=10.0".into(),
                PHASE_VCF.into(),
                "-an".into(),
                "QD".into(),
                "-an".into(),
                "DP".into(),
                "-an".into(),
                "FS".into(),
                "-an".into(),
                "ReadPosRankSum".into(),
            ],
            ApplyMode::Indel => vec![
                "-resource:mills,known=true,training=true,truth=true,prior=12.0".into(),
                MILLS_VCF.into(),
                "-an".into(),
                "DP".into(),
                "-an".into(),
                "FS".into(),
                "-an".into(),
                "ReadPosRankSum".into(),
                "--maxGaussians".into(),
                "4".into(),
            ],
        }
    }
}

pub(crate) fn recalibrated_filename(uuid: &str, mode: ApplyMode, suffix: &str) -> String {
    format!("{uuid}.HAPSNP.vqsr.{}{suffix}.vcf", mode.gatk_mode())
}

/// GATK VariantRecalibrator: trains one model over the unified VCF against
/// this branch's truth sets, then chains into model application.
pub struct RecalibrateVariants {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
    mode: ApplyMode,
}

impl RecalibrateVariants {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor, mode: ApplyMode) -> Self {
        Self {
            name: format!("vqsr-{}-{}", mode.slug(), sample.uuid),
            deps,
            sample,
            mode,
        }
    }
}

#[async_trait]
impl Job for RecalibrateVariants {
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
        hydrate_keys.push(ArtifactKey::sample(uuid, UNIFIED_VCF));
        hydrate_keys.extend(self.mode.truth_sets().iter().map(|f| ArtifactKey::shared(*f)));
        stage.hydrate(&map, &hydrate_keys)?;

        let recal = self.mode.recal_file();
        let tranches = self.mode.tranches_file();
        let plots = self.mode.plots_file();
        let cores = self.resources().cores;

        let mut args = vec![
            "-T".into(),
            "VariantRecalibrator".into(),
            "-R".into(),
            REF_FA.into(),
            "-input".into(),
            UNIFIED_VCF.into(),
            "-nt".into(),
            cores.to_string(),
        ];
        args.extend(self.mode.model_args());
        args.extend([
            "-mode".into(),
            self.mode.gatk_mode().into(),
            "-minNumBad".into(),
            "1000".into(),
            "-recalFile".into(),
            recal.clone(),
            "-tranchesFile".into(),
            tranches.clone(),
            "-rscriptFile".into(),
            plots.clone(),
        ]);

        let invocation = Invocation::new(GATK_IMAGE, args)
            .with_limits(self.resources())
            .with_inputs(hydrate_keys.iter().map(|k| k.filename().to_string()))
            .with_outputs([recal.clone(), tranches.clone(), plots.clone()]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        stage.persist(
            &mut map,
            &[
                ArtifactKey::sample(uuid, &recal),
                ArtifactKey::sample(uuid, &tranches),
                ArtifactKey::sample(uuid, &plots),
            ],
        )?;

        ctx.add_child(
            ApplyRecalibration::new(self.deps.clone(), self.sample.clone(), self.mode),
            JobInputs::from_map(map.clone()),
        );
        Ok(map)
    }
}

/// GATK ApplyRecalibration: rescales the unified VCF with the trained model
/// and delivers the branch's final VCF. Terminal leaf of its branch.
pub struct ApplyRecalibration {
    name: String,
    deps: Arc<PipelineDeps>,
    sample: SampleDescriptor,
    mode: ApplyMode,
}

impl ApplyRecalibration {
    pub fn new(deps: Arc<PipelineDeps>, sample: SampleDescriptor, mode: ApplyMode) -> Self {
        Self {
            name: format!("apply-vqsr-{}-{}", mode.slug(), sample.uuid),
            deps,
            sample,
            mode,
        }
    }
}

#[async_trait]
impl Job for ApplyRecalibration {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> ResourceHint {
        ResourceHint::default().with_memory_mb(self.deps.config.memory_mb)
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<ArtifactMap, JobError> {
        let uuid = &self.sample.uuid;
        let stage = ctx.stage();
        let mut map = ctx.inputs().clone();

        let recal = self.mode.recal_file();
        let tranches = self.mode.tranches_file();
        let mut hydrate_keys = ref_keys().to_vec();
        hydrate_keys.push(ArtifactKey::sample(uuid, UNIFIED_VCF));
        hydrate_keys.push(ArtifactKey::sample(uuid, &recal));
        hydrate_keys.push(ArtifactKey::sample(uuid, &tranches));
        stage.hydrate(&map, &hydrate_keys)?;

        let output = recalibrated_filename(uuid, self.mode, &self.deps.run.suffix);
        let invocation = Invocation::new(
            GATK_IMAGE,
            vec![
                "-T".into(),
                "ApplyRecalibration".into(),
                "-input".into(),
                UNIFIED_VCF.into(),
                "-o".into(),
                output.clone(),
                "-R".into(),
                REF_FA.into(),
                "-nt".into(),
                "1".into(),
                "-ts_filter_level".into(),
                "99.0".into(),
                "-tranchesFile".into(),
                tranches,
                "-recalFile".into(),
                recal,
                "-mode".into(),
                self.mode.gatk_mode().into(),
            ],
        )
        .with_limits(self.resources())
        .with_inputs(hydrate_keys.iter().map(|k| k.filename().to_string()))
        .with_outputs([output.clone()]);
        self.deps.invoker.invoke(ctx.work_dir(), &invocation).await?;

        let output_key = ArtifactKey::sample(uuid, &output);
        stage.persist(&mut map, &[output_key.clone()])?;

        ctx.emit("deliver", format!("placing {output}"));
        self.deps
            .delivery
            .place(&stage.path_of(&output_key), &self.deps.run.destination)
            .await?;
        Ok(map)
    }
}
