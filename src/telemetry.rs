//! Tracing subscriber setup for the CLI binary.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber: `RUST_LOG`-style filtering (default
/// `germweave=info`), compact formatting, and span-trace capture for error
/// reports.
///
/// Idempotent only in the sense that a second call fails quietly; embedders
/// with their own subscriber should skip this and configure tracing
/// themselves.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("germweave=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}
