//! Tracing subscriber setup for embedding processes.

use tracing_subscriber::EnvFilter;

/// Install a compact fmt subscriber honoring `RUST_LOG`, falling back to
/// the given filter. Safe to call once per process.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}
