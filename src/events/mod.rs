//! Structured progress events for pipeline runs.
//!
//! The engine and stage jobs emit [`Event`]s over a shared bus; pluggable
//! [`EventSink`]s decide where they go (stdout for CLI runs, memory for
//! tests, a channel for embedding). Event emission is fire-and-forget and
//! never blocks a running job.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::{EventBus, EventEmitter};
pub use event::{DiagnosticEvent, Event, JobEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
