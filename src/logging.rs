//! Structured logging setup.
//!
//! Mirrors the teacher's `bootstrap::initialize_logging` step: a single call, made once at
//! process start, that installs a global subscriber. The level is controlled by `RUST_LOG`
//! (standard `tracing_subscriber::EnvFilter` syntax), defaulting to `info`.
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber writing to stdout.
///
/// Safe to call more than once in tests; subsequent calls are no-ops (the global
/// subscriber can only be set once per process).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
