//! Telemetry: structured logging setup and authorization metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatekeeper_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
