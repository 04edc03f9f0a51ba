//! External tool invocation.
//!
//! Stage jobs describe an invocation — container image, arguments, resource
//! limits, expected inputs and outputs — and a [`ToolInvoker`] runs it
//! against the job's working directory. The built-in [`DockerInvoker`]
//! shells out to `docker run`; tests substitute scripted implementations.
//!
//! Invocation failures are never retried: a non-zero exit from a genomics
//! tool means the run is over, and the report carries the exact command line
//! and working directory for diagnosis.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::graph::ResourceHint;

/// One external tool invocation against a working directory.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Container image (repository reference) providing the tool.
    pub image: String,
    /// Arguments passed to the tool's entry point.
    pub args: Vec<String>,
    /// Advisory limits forwarded to the container runtime.
    pub limits: ResourceHint,
    /// Filenames the tool expects present in the working directory.
    pub inputs: Vec<String>,
    /// Filenames the tool must produce in the working directory.
    pub outputs: Vec<String>,
}

impl Invocation {
    #[must_use]
    pub fn new(image: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            image: image.into(),
            args,
            limits: ResourceHint::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceHint) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// The full command line, for diagnostics.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.image.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Errors raised by tool invocation.
#[derive(Debug, Error, Diagnostic)]
pub enum InvokeError {
    /// The tool exited non-zero.
    #[error("tool exited with {status} running `{command}` in {work_dir}")]
    #[diagnostic(
        code(germweave::invoke::tool_failed),
        help("Inspect the working directory; it is preserved after a failure.")
    )]
    ToolFailed {
        command: String,
        work_dir: PathBuf,
        status: String,
    },

    /// The container runtime could not be launched at all.
    #[error("could not launch container runtime for `{command}` in {work_dir}: {source}")]
    #[diagnostic(code(germweave::invoke::launch))]
    Launch {
        command: String,
        work_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A declared input was missing before the invocation.
    #[error("declared input {filename} missing from {work_dir} before running `{command}`")]
    #[diagnostic(code(germweave::invoke::missing_input))]
    MissingInput {
        filename: String,
        work_dir: PathBuf,
        command: String,
    },

    /// A declared output did not appear after a zero exit.
    #[error("tool `{command}` exited cleanly but did not produce {filename} in {work_dir}")]
    #[diagnostic(code(germweave::invoke::missing_output))]
    MissingOutput {
        filename: String,
        work_dir: PathBuf,
        command: String,
    },
}

/// Runs a containerized tool against files in a working directory.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, work_dir: &Path, invocation: &Invocation) -> Result<(), InvokeError>;
}

/// `docker run`-based invoker: mounts the working directory at `/data` and
/// executes the image's entry point there.
#[derive(Clone, Debug, Default)]
pub struct DockerInvoker;

impl DockerInvoker {
    /// Verify declared inputs exist before launching and declared outputs
    /// exist after a clean exit. Shared with alternate invokers.
    pub fn check_inputs(work_dir: &Path, invocation: &Invocation) -> Result<(), InvokeError> {
        for filename in &invocation.inputs {
            if !work_dir.join(filename).exists() {
                return Err(InvokeError::MissingInput {
                    filename: filename.clone(),
                    work_dir: work_dir.to_path_buf(),
                    command: invocation.command_line(),
                });
            }
        }
        Ok(())
    }

    pub fn check_outputs(work_dir: &Path, invocation: &Invocation) -> Result<(), InvokeError> {
        for filename in &invocation.outputs {
            if !work_dir.join(filename).exists() {
                return Err(InvokeError::MissingOutput {
                    filename: filename.clone(),
                    work_dir: work_dir.to_path_buf(),
                    command: invocation.command_line(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolInvoker for DockerInvoker {
    async fn invoke(&self, work_dir: &Path, invocation: &Invocation) -> Result<(), InvokeError> {
        Self::check_inputs(work_dir, invocation)?;

        let mut command = tokio::process::Command::new("docker");
        command
            .arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{}:/data", work_dir.display()))
            .arg("-w")
            .arg("/data");
        if let Some(memory_mb) = invocation.limits.memory_mb {
            command.arg("--memory").arg(format!("{memory_mb}m"));
            // Tools in this stack are JVM-based; mirror the ceiling into the VM.
            command
                .arg("-e")
                .arg(format!("JAVA_OPTS=-Xmx{}m", memory_mb));
        }
        command
            .arg("--cpus")
            .arg(invocation.limits.cores.to_string());
        command.arg(&invocation.image).args(&invocation.args);

        tracing::info!(
            image = %invocation.image,
            work_dir = %work_dir.display(),
            "invoking tool"
        );
        let status = command
            .status()
            .await
            .map_err(|source| InvokeError::Launch {
                command: invocation.command_line(),
                work_dir: work_dir.to_path_buf(),
                source,
            })?;

        if !status.success() {
            return Err(InvokeError::ToolFailed {
                command: invocation.command_line(),
                work_dir: work_dir.to_path_buf(),
                status: status.to_string(),
            });
        }

        Self::check_outputs(work_dir, invocation)
    }
}
