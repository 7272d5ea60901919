//! Tracing subscriber bootstrap for binaries and tests embedding the engine.
//!
//! The storage crates only emit `tracing` events; installing a subscriber is the
//! embedding program's decision.

use tracing_subscriber::EnvFilter;

/// Install a formatted stderr subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
