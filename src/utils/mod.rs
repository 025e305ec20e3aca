//! # Utility Modules
//!
//! Supporting utilities shared by the server and the bundled binaries.
//!
//! ## Components
//! - **Logging**: tracing subscriber setup from [`LoggingConfig`]
//! - **Metrics**: Thread-safe observability counters
//!
//! [`LoggingConfig`]: crate::config::LoggingConfig

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
