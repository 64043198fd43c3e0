//! Tracing and logging setup shared by every binary and test harness.

pub mod tracing;

pub use self::tracing::{LogFormat, ObservabilityConfig, ObservabilityError, init, init_with};
