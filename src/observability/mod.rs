//! Structured logging and metrics.
//!
//! The command-line entry point installs a `tracing-subscriber` registry with
//! an `EnvFilter` and a console layer in pretty, compact, or JSON format.
//! Retention counters are exported to Prometheus when the `metrics` feature
//! is enabled.

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
