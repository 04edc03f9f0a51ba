mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::Harness;
use germweave::config::{PipelineConfig, RunContext};
use germweave::delivery::{Destination, LocalMoveSink};
use germweave::fetch::{FetchError, Fetcher};
use germweave::graph::EngineError;
use germweave::invoke::{DockerInvoker, Invocation, InvokeError, ToolInvoker};
use germweave::manifest::{SampleDescriptor, SampleSource};
use germweave::pipeline::{self, PipelineDeps};
use tempfile::TempDir;

/// Deterministic fetcher: the "downloaded" bytes are derived from the URL.
struct FakeFetcher;

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        std::fs::write(dest, format!("payload of {url}")).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })
    }
}

/// Scripted invoker: verifies declared inputs were hydrated, then fabricates
/// every declared output. Optionally fails on a command-line substring.
#[derive(Clone, Default)]
struct ScriptedInvoker {
    commands: Arc<Mutex<Vec<String>>>,
    fail_on: Option<&'static str>,
}

impl ScriptedInvoker {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, work_dir: &Path, invocation: &Invocation) -> Result<(), InvokeError> {
        DockerInvoker::check_inputs(work_dir, invocation)?;
        let command = invocation.command_line();
        self.commands.lock().unwrap().push(command.clone());

        if let Some(needle) = self.fail_on
            && command.contains(needle)
        {
            return Err(InvokeError::ToolFailed {
                command,
                work_dir: work_dir.to_path_buf(),
                status: "exit status: 1".to_string(),
            });
        }

        for output in &invocation.outputs {
            std::fs::write(
                work_dir.join(output),
                format!("{} -> {output}", invocation.image),
            )
            .expect("fabricate output");
        }
        DockerInvoker::check_outputs(work_dir, invocation)
    }
}

fn test_config(indexed: bool) -> PipelineConfig {
    PipelineConfig {
        ref_genome: "file:///refs/hg19.fa".into(),
        phase: "file:///refs/phase.vcf".into(),
        mills: "file:///refs/mills.vcf".into(),
        dbsnp: "file:///refs/dbsnp.vcf".into(),
        hapmap: "file:///refs/hapmap.vcf".into(),
        omni: "file:///refs/omni.vcf".into(),
        file_size: None,
        indexed,
        ssec: None,
        cores: Some(2),
        memory_mb: 1024,
    }
}

struct PipelineRun {
    harness: Harness,
    invoker: ScriptedInvoker,
    out_dir: PathBuf,
    _out_root: TempDir,
}

fn pipeline_run(
    samples: Vec<SampleDescriptor>,
    indexed: bool,
    fail_on: Option<&'static str>,
) -> PipelineRun {
    let out_root = TempDir::new().unwrap();
    let out_dir = out_root.path().join("results");
    let mut harness = Harness::new(2);
    let invoker = ScriptedInvoker {
        fail_on,
        ..ScriptedInvoker::default()
    };

    // A single sample goes inline; more go through a real manifest file.
    let sample_source = if samples.len() == 1 {
        SampleSource::Inline(samples[0].clone())
    } else {
        let manifest_path = out_root.path().join("manifest.tsv");
        let mut text = String::from("# test manifest\n\n");
        for sample in &samples {
            text.push_str(&format!("{}\t{}\n", sample.uuid, sample.url));
        }
        std::fs::write(&manifest_path, text).unwrap();
        SampleSource::Manifest(manifest_path)
    };

    let deps = Arc::new(PipelineDeps {
        config: test_config(indexed),
        run: RunContext {
            samples: sample_source,
            destination: Destination::LocalDir(out_dir.clone()),
            suffix: ".test".into(),
        },
        fetcher: Arc::new(FakeFetcher),
        invoker: Arc::new(invoker.clone()),
        delivery: Arc::new(LocalMoveSink),
    });

    pipeline::build(&mut harness.engine, deps).expect("graph construction");
    PipelineRun {
        harness,
        invoker,
        out_dir,
        _out_root: out_root,
    }
}

fn delivered_files(out_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(out_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn sample(uuid: &str) -> SampleDescriptor {
    SampleDescriptor {
        uuid: uuid.into(),
        url: format!("file:///samples/{uuid}.bam"),
    }
}

#[tokio::test]
async fn single_sample_produces_both_recalibrated_vcfs() {
    let mut run = pipeline_run(vec![sample("S1")], false, None);
    run.harness.engine.run().await.unwrap();

    let delivered = delivered_files(&run.out_dir);
    assert_eq!(
        delivered,
        vec![
            "S1.HAPSNP.vqsr.INDEL.test.vcf".to_string(),
            "S1.HAPSNP.vqsr.SNP.test.vcf".to_string(),
            "S1.raw.BOTH.test.gvcf".to_string(),
        ],
        "each branch must reach its own sink exactly once"
    );

    let commands = run.invoker.commands();
    let count = |needle: &str| commands.iter().filter(|c| c.contains(needle)).count();
    assert_eq!(count("faidx"), 1);
    assert_eq!(count("CreateSequenceDictionary"), 1);
    assert_eq!(count("index sample.bam"), 1);
    assert_eq!(count("HaplotypeCaller"), 1);
    assert_eq!(count("GenotypeGVCFs"), 1);
    assert_eq!(count("VariantRecalibrator"), 2);
    assert_eq!(count("ApplyRecalibration"), 2);
}

#[tokio::test]
async fn pre_indexed_samples_skip_the_indexing_stage() {
    let mut run = pipeline_run(vec![sample("S1")], true, None);
    run.harness.engine.run().await.unwrap();

    let commands = run.invoker.commands();
    assert!(
        !commands.iter().any(|c| c.contains("index sample.bam")),
        "indexing must be skipped when a .bai exists at the sibling URL: {commands:?}"
    );
    assert_eq!(delivered_files(&run.out_dir).len(), 3);
}

#[tokio::test]
async fn independent_samples_each_reach_their_sinks() {
    let mut run = pipeline_run(vec![sample("A"), sample("B")], false, None);
    run.harness.engine.run().await.unwrap();

    let delivered = delivered_files(&run.out_dir);
    assert_eq!(delivered.len(), 6);
    for uuid in ["A", "B"] {
        assert!(delivered.contains(&format!("{uuid}.HAPSNP.vqsr.SNP.test.vcf")));
        assert!(delivered.contains(&format!("{uuid}.HAPSNP.vqsr.INDEL.test.vcf")));
        assert!(delivered.contains(&format!("{uuid}.raw.BOTH.test.gvcf")));
    }
}

#[tokio::test]
async fn recalibration_failure_aborts_naming_the_stage() {
    let mut run = pipeline_run(vec![sample("S1")], false, Some("-mode SNP"));
    let err = run.harness.engine.run().await.unwrap_err();

    match err {
        EngineError::StageFailed { stage, .. } => {
            assert_eq!(stage, "vqsr-snp-S1", "failure must name the failing stage")
        }
        other => panic!("unexpected error: {other}"),
    }

    let delivered = delivered_files(&run.out_dir);
    assert!(
        !delivered.contains(&"S1.HAPSNP.vqsr.SNP.test.vcf".to_string()),
        "no partial result may be promoted past a failed stage"
    );
}
