//! Sample manifest parsing.
//!
//! A manifest is UTF-8 text, one sample per line, two tab-separated fields
//! `UUID\tURL`. Blank lines and lines starting with `#` are comments. A
//! single inline sample may substitute for a manifest file. Expansion is
//! lazy, finite and non-restartable: each line is consumed exactly once.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// One sample to process: a unique identifier and the location of its
/// aligned reads.
///
/// Independent samples share nothing but the read-only reference artifacts;
/// everything derived downstream is keyed by this identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleDescriptor {
    pub uuid: String,
    pub url: String,
}

/// Errors raised while reading a manifest.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    /// The manifest file could not be opened.
    #[error("could not read manifest at {path}: {source}")]
    #[diagnostic(
        code(germweave::manifest::read),
        help("Generate a template with the generate-manifest subcommand.")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A data line did not have exactly two tab-separated fields.
    #[error("malformed manifest line {line_number}: expected `UUID\\tURL`, got {content:?}")]
    #[diagnostic(code(germweave::manifest::malformed_line))]
    MalformedLine { line_number: usize, content: String },
}

/// Where samples come from for one run.
#[derive(Clone, Debug)]
pub enum SampleSource {
    /// A manifest file on disk.
    Manifest(PathBuf),
    /// A single sample given inline on the command line.
    Inline(SampleDescriptor),
}

impl SampleSource {
    /// Expand into the run's sample sequence, consuming each manifest line
    /// once.
    pub fn expand(&self) -> Result<Vec<SampleDescriptor>, ManifestError> {
        match self {
            SampleSource::Inline(sample) => Ok(vec![sample.clone()]),
            SampleSource::Manifest(path) => {
                let file = std::fs::File::open(path).map_err(|source| ManifestError::Read {
                    path: path.clone(),
                    source,
                })?;
                parse_manifest(file)
            }
        }
    }
}

/// Parse manifest lines from any reader.
pub fn parse_manifest(reader: impl Read) -> Result<Vec<SampleDescriptor>, ManifestError> {
    let mut samples = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|source| ManifestError::Read {
            path: PathBuf::new(),
            source,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split('\t').filter(|f| !f.is_empty());
        match (fields.next(), fields.next(), fields.next()) {
            (Some(uuid), Some(url), None) => samples.push(SampleDescriptor {
                uuid: uuid.to_string(),
                url: url.to_string(),
            }),
            _ => {
                return Err(ManifestError::MalformedLine {
                    line_number,
                    content: trimmed.to_string(),
                });
            }
        }
    }
    tracing::debug!(samples = samples.len(), "manifest expanded");
    Ok(samples)
}

/// Convenience wrapper over [`parse_manifest`] for a path.
pub fn parse_manifest_file(path: &Path) -> Result<Vec<SampleDescriptor>, ManifestError> {
    SampleSource::Manifest(path.to_path_buf()).expand()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let text = "# header\n\nA\turlA\nB\turlB\n";
        let samples = parse_manifest(text.as_bytes()).unwrap();
        assert_eq!(
            samples,
            vec![
                SampleDescriptor {
                    uuid: "A".into(),
                    url: "urlA".into()
                },
                SampleDescriptor {
                    uuid: "B".into(),
                    url: "urlB".into()
                },
            ]
        );
    }

    #[test]
    fn malformed_lines_are_rejected_with_position() {
        let text = "# ok\njust-one-field\n";
        let err = parse_manifest(text.as_bytes()).unwrap_err();
        match err {
            ManifestError::MalformedLine { line_number, .. } => assert_eq!(line_number, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inline_sample_expands_to_one_descriptor() {
        let source = SampleSource::Inline(SampleDescriptor {
            uuid: "S1".into(),
            url: "file:///tmp/s1.bam".into(),
        });
        assert_eq!(source.expand().unwrap().len(), 1);
    }
}
