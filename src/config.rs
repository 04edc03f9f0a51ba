//! Pipeline configuration.
//!
//! A run reads one YAML configuration file before any node is scheduled and
//! never mutates it afterwards. Per-run values (suffix, output destination,
//! sample source) live in [`RunContext`], constructed from the CLI and passed
//! down the call chain explicitly — there is no shared mutable options
//! object.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::Destination;
use crate::manifest::SampleSource;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("could not read config file at {path}: {source}")]
    #[diagnostic(
        code(germweave::config::read),
        help("Generate a template with the generate-config subcommand.")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed as YAML.
    #[error("could not parse config file at {path}: {source}")]
    #[diagnostic(
        code(germweave::config::parse),
        help("Every reference and truth-set URL in the template must be filled in.")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required key was left blank in the template.
    #[error("required config key '{key}' is empty")]
    #[diagnostic(code(germweave::config::missing_key))]
    MissingKey { key: &'static str },

    /// Mutually exclusive sample sources were both (or neither) supplied.
    #[error("{message}")]
    #[diagnostic(code(germweave::config::sample_source))]
    SampleSource { message: String },
}

/// Immutable reference-data and sizing configuration, read once at startup.
///
/// URLs point at the reference genome and the five recalibration truth sets
/// the workflow stages consume. `file_size` is an operator hint for
/// provisioning, `indexed` short-circuits sample indexing when a `.bai`
/// exists next to each sample URL, and `ssec` carries a client-side
/// encryption key path through to remote output sinks.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineConfig {
    /// Reference genome URL.
    pub ref_genome: String,
    /// 1000G phase 1 indels truth set URL.
    pub phase: String,
    /// Mills and 1000G gold standard indels truth set URL.
    pub mills: String,
    /// dbSNP truth set URL.
    pub dbsnp: String,
    /// HapMap truth set URL.
    pub hapmap: String,
    /// 1000G omni truth set URL.
    pub omni: String,
    /// Approximate input file size, e.g. `100G`. Advisory only.
    #[serde(default)]
    pub file_size: Option<String>,
    /// Whether sample BAMs already have a `.bai` at the sibling URL.
    #[serde(default)]
    pub indexed: bool,
    /// Optional client-side encryption key path, forwarded to remote output
    /// sinks only; fetching never consults it.
    #[serde(default)]
    pub ssec: Option<PathBuf>,
    /// Total concurrency budget in cores. Defaults to host parallelism.
    #[serde(default)]
    pub cores: Option<u32>,
    /// Memory ceiling per tool invocation, in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

fn default_memory_mb() -> u64 {
    15 * 1024
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 6] = [
            ("ref-genome", &self.ref_genome),
            ("phase", &self.phase),
            ("mills", &self.mills),
            ("dbsnp", &self.dbsnp),
            ("hapmap", &self.hapmap),
            ("omni", &self.omni),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingKey { key });
            }
        }
        Ok(())
    }

    /// Effective core budget for the engine.
    #[must_use]
    pub fn effective_cores(&self) -> u32 {
        self.cores
            .unwrap_or_else(crate::graph::JobEngine::default_cores)
    }
}

/// Per-run context derived from the CLI, passed explicitly down the graph.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Where this run's samples come from.
    pub samples: SampleSource,
    /// Where finished artifacts are placed.
    pub destination: Destination,
    /// Suffix embedded in output filenames, e.g. `.bqsr`.
    pub suffix: String,
}

/// Emit the editable configuration template.
#[must_use]
pub fn generate_config_template() -> String {
    "\
# Germline variant-calling pipeline configuration.
# This file is YAML: write the value after the colon, with at least one space.
# Comments (beginning with #) do not need to be removed.
##############################################################################
ref-genome:               # Required: reference genome URL
phase:                    # Required: 1000G_phase1.indels sites VCF URL
mills:                    # Required: Mills_and_1000G_gold_standard.indels VCF URL
dbsnp:                    # Required: dbSNP leftAligned VCF URL
hapmap:                   # Required: hapmap sites VCF URL
omni:                     # Required: 1000G_omni VCF URL
file-size: 100G           # Approximate input file size, as %d[TGMK]
indexed: false            # true when a .bam.bai exists at each sample's sibling URL
ssec:                     # Optional: path to a key file for client-side encryption on upload
"
    .to_string()
}

/// Emit the editable manifest template.
#[must_use]
pub fn generate_manifest_template() -> String {
    "\
#   Edit this manifest to include information pertaining to each sample.
#   There are 2 tab-separated columns: UUID and URL.
#
#   UUID    A unique identifier for the sample to be processed.
#   URL     A URL (http://, file://) pointing to the input BAM file.
#
#   Example below; lines beginning with # are ignored.
#
#   UUID_1\tfile:///path/to/sample.bam
#
#   Place your samples below, one per line.
"
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_config_parses_with_defaults() {
        let yaml = "\
ref-genome: file:///refs/hg19.fa
phase: file:///refs/phase.vcf
mills: file:///refs/mills.vcf
dbsnp: file:///refs/dbsnp.vcf
hapmap: file:///refs/hapmap.vcf
omni: file:///refs/omni.vcf
file-size: 10G
indexed: true
";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ref_genome, "file:///refs/hg19.fa");
        assert!(config.indexed);
        assert!(config.ssec.is_none());
        assert_eq!(config.memory_mb, 15 * 1024);
    }

    #[test]
    fn blank_required_key_is_rejected() {
        let yaml = "\
ref-genome: ' '
phase: p
mills: m
dbsnp: d
hapmap: h
omni: o
";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey { key: "ref-genome" })
        ));
    }
}
