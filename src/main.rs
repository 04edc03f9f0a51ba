//! Germweave CLI: template generation and pipeline runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr, miette};

use germweave::artifacts::ArtifactStore;
use germweave::config::{
    ConfigError, PipelineConfig, RunContext, generate_config_template, generate_manifest_template,
};
use germweave::delivery::{Destination, LocalMoveSink};
use germweave::events::{EventBus, StdOutSink};
use germweave::fetch::UrlFetcher;
use germweave::graph::JobEngine;
use germweave::invoke::DockerInvoker;
use germweave::manifest::{SampleDescriptor, SampleSource};
use germweave::pipeline::{self, PipelineDeps};
use germweave::types::RunId;

#[derive(Parser)]
#[command(name = "germweave")]
#[command(about = "DAG-driven germline variant-calling pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an editable config in the current working directory.
    GenerateConfig,
    /// Generate an editable manifest in the current working directory.
    GenerateManifest,
    /// Generate both a config and a manifest.
    Generate,
    /// Run the germline variant-calling pipeline.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the filled-in config file.
    #[arg(long, default_value = "germweave.config")]
    config: PathBuf,

    /// Path to the filled-in manifest file.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// A single inline sample: UUID and BAM URL.
    #[arg(long, num_args = 2, value_names = ["UUID", "URL"], conflicts_with = "manifest")]
    sample: Option<Vec<String>>,

    /// Directory or object-store URI prefix for final results.
    #[arg(long)]
    output_dir: String,

    /// Additional suffix for output filenames.
    #[arg(short, long, default_value = ".bqsr")]
    suffix: String,

    /// Root directory for the artifact store and working directories.
    #[arg(long, default_value = ".germweave")]
    state_dir: PathBuf,
}

const CONFIG_TEMPLATE_NAME: &str = "germweave.config";
const MANIFEST_TEMPLATE_NAME: &str = "germweave-manifest.tsv";

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    germweave::telemetry::init();

    match Cli::parse().command {
        Commands::GenerateConfig => write_template(CONFIG_TEMPLATE_NAME, &generate_config_template()),
        Commands::GenerateManifest => {
            write_template(MANIFEST_TEMPLATE_NAME, &generate_manifest_template())
        }
        Commands::Generate => {
            write_template(CONFIG_TEMPLATE_NAME, &generate_config_template())?;
            write_template(MANIFEST_TEMPLATE_NAME, &generate_manifest_template())
        }
        Commands::Run(args) => run(args),
    }
}

fn write_template(name: &str, content: &str) -> Result<()> {
    std::fs::write(name, content)
        .into_diagnostic()
        .wrap_err_with(|| format!("could not write template {name}"))?;
    println!("wrote {name}");
    Ok(())
}

fn sample_source(args: &RunArgs) -> Result<SampleSource, ConfigError> {
    match (&args.sample, &args.manifest) {
        (Some(pair), None) => Ok(SampleSource::Inline(SampleDescriptor {
            uuid: pair[0].clone(),
            url: pair[1].clone(),
        })),
        (None, Some(path)) => {
            if !path.exists() {
                return Err(ConfigError::SampleSource {
                    message: format!(
                        "{} not found; run generate-manifest first",
                        path.display()
                    ),
                });
            }
            Ok(SampleSource::Manifest(path.clone()))
        }
        (None, None) => Err(ConfigError::SampleSource {
            message: "either --manifest or --sample is required".to_string(),
        }),
        (Some(_), Some(_)) => Err(ConfigError::SampleSource {
            message: "--manifest and --sample are mutually exclusive".to_string(),
        }),
    }
}

fn run(args: RunArgs) -> Result<()> {
    if !args.config.exists() {
        return Err(miette!(
            "{} not found; run generate-config first",
            args.config.display()
        ));
    }
    let config = PipelineConfig::load(&args.config)?;
    let samples = sample_source(&args)?;
    let destination = Destination::parse(&args.output_dir, config.ssec.clone());
    if matches!(destination, Destination::Remote { .. }) {
        return Err(miette!(
            "remote output destinations require an embedding application that supplies an \
             uploading sink; pass a local --output-dir"
        ));
    }

    let run_context = RunContext {
        samples,
        destination,
        suffix: args.suffix.clone(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async move {
        let run_id = RunId::generate();
        tracing::info!(run = %run_id, "pipeline run starting");

        let store = ArtifactStore::open(&args.state_dir.join("store"))?;
        let bus = EventBus::with_sink(StdOutSink::default());
        bus.listen_for_events();

        let mut engine = JobEngine::new(
            store,
            &args.state_dir.join("work").join(run_id.as_str()),
            bus.get_emitter(),
            config.effective_cores(),
        )?;

        let deps = Arc::new(PipelineDeps {
            config,
            run: run_context,
            fetcher: Arc::new(UrlFetcher::default()),
            invoker: Arc::new(DockerInvoker),
            delivery: Arc::new(LocalMoveSink),
        });
        pipeline::build(&mut engine, deps)?;

        let result = engine.run().await;
        bus.stop_listener().await;
        result?;

        tracing::info!(run = %run_id, "pipeline run completed");
        Ok(())
    })
}
