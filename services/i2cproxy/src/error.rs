//! Error types for the proxy service
//!
//! Bus failures are per-request and never fatal to the process. They are
//! reported to the client as `ERROR` and never reach [`errors::ProxyError`].

use thiserror::Error;

/// Bus transaction error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The device did not complete the transaction (NACK, short transfer, ioctl failure)
    #[error("Device error at address={address}, register={register}: {reason}")]
    Device {
        address: u8,
        register: u8,
        reason: String,
    },

    /// Register count outside 1..=256
    #[error("Invalid register count {count} (allowed 1..={max})")]
    InvalidCount { count: usize, max: usize },

    /// The blocking worker running the transaction failed
    #[error("Bus worker failed: {0}")]
    Worker(String),
}

impl BusError {
    pub fn device(address: u8, register: u8, reason: impl Into<String>) -> Self {
        BusError::Device {
            address,
            register,
            reason: reason.into(),
        }
    }
}

/// Result type alias for bus transactions
pub type BusResult<T> = std::result::Result<T, BusError>;
