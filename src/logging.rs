use std::env;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "COMMANDER_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Filter from `COMMANDER_LOG`, then `RUST_LOG`, then `warn`. Unparseable
/// directives fall back to the default rather than failing start-up.
pub fn filter_from_env() -> EnvFilter {
    let raw = env::var(LOG_ENV)
        .ok()
        .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
        .filter(|v| !v.trim().is_empty());
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays JSON.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
