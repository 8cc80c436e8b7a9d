//! Tracing bootstrap
//!
//! Structured logging via `tracing` with an env-filter. Metrics export and
//! distributed tracing backends are left to the embedding program.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG` for the filter, defaulting to `info`. Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
