//! `i2cproxy` basic library
//!
//! Provides functions shared by the proxy binary and its tests:
//! - logging bootstrap
//! - startup banner and settings report
//! - shutdown signal handling
//! - layered configuration loading

pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

// Re-export common dependencies
pub use serde;
pub use tokio;
