//! Placement of finished artifacts at their final destination.
//!
//! The terminal act of every pipeline branch is handing a file to an
//! [`OutputSink`]. The crate ships [`LocalMoveSink`] for directory
//! destinations; remote object-store destinations are an external
//! collaborator supplied by the embedding application through the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Where finished artifacts go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// A directory on the local filesystem; artifacts are moved into it.
    LocalDir(PathBuf),
    /// A remote object-store URI prefix, optionally with a client-side
    /// encryption key reference for the uploading sink.
    Remote {
        uri_prefix: String,
        encryption_key: Option<PathBuf>,
    },
}

impl Destination {
    /// Classify a CLI `--output-dir` value: URI prefixes with a scheme are
    /// remote, everything else is a local directory.
    #[must_use]
    pub fn parse(raw: &str, encryption_key: Option<PathBuf>) -> Self {
        if raw.contains("://") {
            Destination::Remote {
                uri_prefix: raw.to_string(),
                encryption_key,
            }
        } else {
            Destination::LocalDir(PathBuf::from(raw))
        }
    }
}

/// Errors raised while placing an artifact.
#[derive(Debug, Error, Diagnostic)]
pub enum DeliveryError {
    /// Moving into a local destination directory failed.
    #[error("could not place {artifact} into {dest}: {source}")]
    #[diagnostic(code(germweave::delivery::io))]
    Io {
        artifact: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured sink cannot handle the destination kind.
    #[error("no sink available for destination {dest}")]
    #[diagnostic(
        code(germweave::delivery::unsupported),
        help("Remote destinations require an uploading sink supplied by the embedding application.")
    )]
    Unsupported { dest: String },
}

/// Moves or uploads a finished artifact to its destination.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn place(&self, artifact: &Path, destination: &Destination) -> Result<(), DeliveryError>;
}

/// Local-directory sink: creates the destination directory and moves the
/// artifact into it, falling back to copy+remove across filesystems.
#[derive(Clone, Debug, Default)]
pub struct LocalMoveSink;

#[async_trait]
impl OutputSink for LocalMoveSink {
    async fn place(&self, artifact: &Path, destination: &Destination) -> Result<(), DeliveryError> {
        let dir = match destination {
            Destination::LocalDir(dir) => dir.clone(),
            Destination::Remote { uri_prefix, .. } => {
                return Err(DeliveryError::Unsupported {
                    dest: uri_prefix.clone(),
                });
            }
        };

        let filename = artifact
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("artifact"));
        let target = dir.join(filename);

        let artifact_path = artifact.to_path_buf();
        let source_path = artifact_path.clone();
        let target_dir = dir.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&target_dir)?;
            match std::fs::rename(&source_path, &target) {
                Ok(()) => Ok(()),
                Err(_) => {
                    // Rename fails across filesystems; copy then remove.
                    std::fs::copy(&source_path, &target)?;
                    std::fs::remove_file(&source_path)
                }
            }
        })
        .await
        .map_err(|join_err| DeliveryError::Io {
            artifact: artifact_path.clone(),
            dest: dir.clone(),
            source: std::io::Error::other(join_err),
        })?;

        result.map_err(|source| DeliveryError::Io {
            artifact: artifact_path,
            dest: dir,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_remote_prefixes() {
        assert_eq!(
            Destination::parse("/data/out", None),
            Destination::LocalDir(PathBuf::from("/data/out"))
        );
        assert!(matches!(
            Destination::parse("s3://bucket/results", None),
            Destination::Remote { .. }
        ));
    }
}
