//! Infrastructure - configuration, metrics, and logging setup
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `logging` - tracing subscriber setup shared by the binaries

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use metrics::Metrics;
