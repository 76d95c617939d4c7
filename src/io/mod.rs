//! IO modules - external interfaces
//!
//! - `http` - hyper HTTP server exposing `/health`, `/predict` and `/metrics`
//! - `prometheus` - Prometheus text formatting for `/metrics`
//! - `checkpoint` - JSON model checkpoint save/load

pub mod checkpoint;
pub mod http;
pub mod prometheus;

pub use checkpoint::Checkpoint;
pub use http::{serve, start_server, AppState};
