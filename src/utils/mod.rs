//! Utility modules for common functionality.
//!
//! - http: retryable HTTP client construction
//! - logging: logging setup
//! - metrics: Prometheus metrics and the metrics server
//! - tests: builders for tests

pub mod http;
pub mod logging;
pub mod metrics;
pub mod tests;
