// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Logging
//!
//! Structured logging via `tracing`, initialized once from the CLI entry
//! point. Library code never configures a subscriber itself — callers
//! embedding the store in their own process are expected to have already
//! installed one, same as any well-behaved `tracing`-instrumented crate.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading its filter from
/// `PICKLEKV_LOG` (falling back to `info`).
///
/// Idempotent in the sense that a second call is harmless: `set_global_default`
/// failures (another subscriber already installed) are logged at `debug` and
/// swallowed, since the CLI binary is the only caller and only calls this
/// once.
pub fn init() {
    let filter = EnvFilter::try_from_env("PICKLEKV_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed, skipping");
    }
}
