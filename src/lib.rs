//! Crowd predictor library
//!
//! Transit crowd-level classification: synthetic data, training, and an
//! HTTP inference service. Exposes modules for integration testing and for
//! the `crowd-server` and `crowd-train` binaries.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
