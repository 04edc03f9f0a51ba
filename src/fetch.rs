//! Source acquisition with bounded retry.
//!
//! Reference data and sample inputs arrive by URL. The [`Fetcher`] trait is
//! the seam stage jobs consume; [`UrlFetcher`] is the built-in
//! implementation: `http(s)://` streams through reqwest with a bounded retry
//! loop, `file://` copies locally. Object-store schemes are an external
//! collaborator and are rejected here rather than half-supported.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use miette::Diagnostic;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised while acquiring a source.
#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    /// Every attempt at the URL failed.
    #[error("could not acquire {url} after {attempts} attempts: {message}")]
    #[diagnostic(
        code(germweave::fetch::exhausted),
        help("Check the input URL and network reachability.")
    )]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The URL scheme has no built-in transport.
    #[error("unsupported URL scheme in {url}")]
    #[diagnostic(
        code(germweave::fetch::unsupported_scheme),
        help("Built-in transports are http://, https:// and file://.")
    )]
    UnsupportedScheme { url: String },

    /// Writing the fetched bytes to disk failed.
    #[error("could not write fetched data to {path}: {source}")]
    #[diagnostic(code(germweave::fetch::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Retrieves a URL into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Built-in fetcher: streaming HTTP(S) with bounded retries, local copy for
/// `file://`.
pub struct UrlFetcher {
    client: reqwest::Client,
    max_attempts: u32,
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::new(5)
    }
}

impl UrlFetcher {
    /// A fetcher that retries transient transport failures up to
    /// `max_attempts` times per URL.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    async fn fetch_http(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.try_once(url, dest).await {
                Ok(()) => return Ok(()),
                Err(TransferError::Io { path, source }) => {
                    // Local disk failure is not transient; do not retry.
                    return Err(FetchError::Io { path, source });
                }
                Err(TransferError::Transport(message)) => {
                    tracing::warn!(url, attempt, max = self.max_attempts, error = %message, "fetch attempt failed");
                    last_error = message;
                }
            }
        }
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: self.max_attempts,
            message: last_error,
        })
    }

    async fn try_once(&self, url: &str, dest: &Path) -> Result<(), TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| TransferError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransferError::Transport(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|source| TransferError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| TransferError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

enum TransferError {
    Transport(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
impl Fetcher for UrlFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        if let Some(local) = url.strip_prefix("file://") {
            tokio::fs::copy(local, dest)
                .await
                .map_err(|source| FetchError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
            return Ok(());
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url, dest).await;
        }
        Err(FetchError::UnsupportedScheme {
            url: url.to_string(),
        })
    }
}
