//! `tracing-subscriber` setup for the demo binary. Library code never
//! installs a subscriber itself — only emits `tracing` events — so that
//! embedding applications control their own log output, matching how
//! `ext/runtime` and `plugins/pool` leave subscriber installation to their
//! respective binaries.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `level`, overridable at runtime
/// via `RUST_LOG`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
