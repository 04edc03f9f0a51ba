//! The job graph: nodes, dependency edges, promises, and the engine that
//! drives them.
//!
//! A workflow is a tree of [`Job`]s connected by two kinds of edges:
//!
//! - **child** edges: children run after their parent's action returns, with
//!   no ordering among siblings;
//! - **follow-on** edges: a follow-on runs only after its parent *and every
//!   node in the parent's subtree* (children, their descendants, nested
//!   follow-ons) has succeeded.
//!
//! Data moves between nodes as [`Promise`]s of artifact maps: a promise is
//! created when a node is registered and fulfilled by the engine when the
//! producing node's action returns, so a consumer can never observe a value
//! before its dependency edge is satisfied.

pub mod engine;
pub mod job;
pub mod promise;

pub use engine::{EngineError, JobEngine};
pub use job::{Job, JobContext, JobError, ResourceHint};
pub use promise::{JobHandle, JobInputs, Promise};
