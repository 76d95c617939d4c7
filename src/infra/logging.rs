//! Structured logging setup
//!
//! Level comes from `RUST_LOG`, default INFO. Use `RUST_LOG=debug` for
//! per-epoch and per-request events.

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Build hash exported by `build.rs`
pub const GIT_HASH: &str = env!("GIT_HASH");

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();
}
