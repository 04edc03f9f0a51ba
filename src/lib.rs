//! # Germweave: DAG-driven germline variant-calling pipeline executor
//!
//! Germweave coordinates a multi-stage genomic variant-calling workflow as a
//! dynamic job graph: dependent stages are nodes with explicit child and
//! follow-on edges, intermediate results travel between them as promises of
//! artifact maps, and every external tool invocation runs against a private,
//! hydrated working directory.
//!
//! ## Core Concepts
//!
//! - **Jobs**: Async units of work spawning children and follow-ons
//! - **Promises**: Forward references to a job's output, resolved at dispatch
//! - **Artifact Store**: Content-addressed durable storage shared by all jobs
//! - **Stage Manager**: Idempotent hydration in and out of working directories
//! - **Engine**: Concurrent dispatch with subtree-aware follow-on ordering
//!
//! ## Quick Start
//!
//! ```no_run
//! use germweave::artifacts::ArtifactStore;
//! use germweave::events::EventBus;
//! use germweave::graph::{JobEngine, JobInputs};
//! use std::path::Path;
//!
//! # async fn example(job: impl germweave::graph::Job + 'static) -> miette::Result<()> {
//! let store = ArtifactStore::open(Path::new("/var/lib/germweave/store"))?;
//! let bus = EventBus::default();
//! bus.listen_for_events();
//!
//! let mut engine = JobEngine::new(
//!     store,
//!     Path::new("/var/lib/germweave/work"),
//!     bus.get_emitter(),
//!     JobEngine::default_cores(),
//! )?;
//! engine.schedule(job, JobInputs::new());
//! engine.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Job trait, promises, and the graph engine
//! - [`artifacts`] - Content-addressed store, artifact maps, staging
//! - [`pipeline`] - The variant-calling workflow stages themselves
//! - [`events`] - Structured progress events and sinks
//! - [`config`] - Immutable pipeline configuration and run context
//! - [`manifest`] - Sample manifest parsing
//! - [`fetch`], [`invoke`], [`delivery`] - External collaborator interfaces

pub mod artifacts;
pub mod config;
pub mod delivery;
pub mod events;
pub mod fetch;
pub mod graph;
pub mod invoke;
pub mod manifest;
pub mod pipeline;
pub mod telemetry;
pub mod types;
