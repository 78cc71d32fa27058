//! Development-time tracing for hosts embedding the orchestrator.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the orchestration record.
//!
//! - **Event log (`io/event_log`)**: Product artifact in
//!   `.claude/state/events.jsonl`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format. Panics if a global subscriber is already set.
///
/// # Example
/// ```bash
/// RUST_LOG=orchestrator=debug cargo test
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Like [`init`], but reports an already-installed subscriber instead of panicking.
pub fn try_init() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
}
