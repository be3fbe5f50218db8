//! Shared configuration, error types, IDs, and observability primitives for CubeFlow crates.
//!
//! Architecture role:
//! - defines engine configuration passed to every group member
//! - provides common [`CbfError`] / [`Result`] contracts
//! - hosts typed identifiers and the metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::EngineConfig;
pub use error::{CbfError, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
