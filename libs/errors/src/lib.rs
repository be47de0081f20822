//! Unified error handling for i2cproxy
//!
//! Startup and configuration failures share one error type so
//! `main` can report them uniformly and map them to an exit status.

use thiserror::Error;

// ============================================================================
// ProxyError - Main error type
// ============================================================================

/// Main error type for the proxy service and its support libraries
#[derive(Debug, Error)]
pub enum ProxyError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Hardware & Network Errors
    // ======================================
    #[error("Couldn't open bus {bus}: {reason}")]
    BusOpen { bus: String, reason: String },

    #[error("Couldn't bind {endpoint}: {reason}")]
    Bind { endpoint: String, reason: String },

    // ======================================
    // Process & Runtime Errors
    // ======================================
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Daemonize failed: {0}")]
    Daemonize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the workspace
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Configuration(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProxyError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn bus_open(bus: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ProxyError::BusOpen {
            bus: bus.to_string(),
            reason: reason.into(),
        }
    }

    pub fn bind(endpoint: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ProxyError::Bind {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ProxyError::Internal(msg.into())
    }

    /// Get error code (for logs)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::BusOpen { .. } => "BUS_OPEN_FAILED",
            Self::Bind { .. } => "BIND_FAILED",
            Self::Logging(_) => "LOGGING_ERROR",
            Self::Daemonize(_) => "DAEMONIZE_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
