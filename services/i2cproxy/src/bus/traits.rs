//! Register bus interface
//!
//! A register bus addresses devices by 7-bit slave address and exposes
//! byte-wide registers inside each device. Every operation is one complete
//! transaction: select the device, write the register number, then read or
//! write data.

use std::fmt;

use async_trait::async_trait;

use crate::error::{BusError, BusResult};

/// Most registers one read may return
pub const MAX_REGISTER_COUNT: usize = 256;

/// One physical register bus
#[async_trait]
pub trait RegisterBus: Send + Sync + fmt::Debug {
    /// Human-readable bus name, used in logs
    fn name(&self) -> &str;

    /// Read `count` consecutive registers starting at `register`
    async fn read_registers(&self, address: u8, register: u8, count: usize) -> BusResult<Vec<u8>>;

    /// Write a single register
    async fn write_register(&self, address: u8, register: u8, value: u8) -> BusResult<()>;
}

/// Reject counts outside `1..=MAX_REGISTER_COUNT`
pub fn check_count(count: usize) -> BusResult<()> {
    if count == 0 || count > MAX_REGISTER_COUNT {
        return Err(BusError::InvalidCount {
            count,
            max: MAX_REGISTER_COUNT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_count() {
        assert!(check_count(1).is_ok());
        assert!(check_count(256).is_ok());
        assert_eq!(
            check_count(0),
            Err(BusError::InvalidCount { count: 0, max: 256 })
        );
        assert!(check_count(257).is_err());
    }
}
