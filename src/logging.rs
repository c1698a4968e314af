//! Structured logging setup, mirroring the teacher's `tracing`-based event
//! naming convention (dotted event names, key=value fields).

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading filter directives from
/// `STRATA_LOG` (falling back to `info`). Intended for binaries and tests;
/// library code never installs a subscriber itself.
///
/// Safe to call more than once - later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
