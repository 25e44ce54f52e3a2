//! Observability Module
//!
//! - `events`: structured lifecycle events with consistent fields
//! - `metrics`: registration and watch metrics through the `metrics` facade
//! - `tracing`: subscriber setup for applications embedding the library

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::describe_metrics;
pub use self::tracing::{init_tracing, TracingConfig};
