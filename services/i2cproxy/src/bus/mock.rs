//! In-memory register bus
//!
//! Backs `--mock-bus` and the test suites. Every address owns a bank of 256
//! registers; multi-register reads auto-increment and wrap within the bank.
//! Clones share the same bank, so a command handle and a poll handle see
//! each other's writes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::traits::{check_count, RegisterBus};
use crate::error::{BusError, BusResult};

const BANK_SIZE: usize = 256;

#[derive(Debug)]
struct MockBusState {
    /// 256 banks of 256 registers, indexed `address * 256 + register`
    registers: Vec<u8>,
    failing: HashSet<u8>,
    transactions: u64,
}

/// Simulated register bus
#[derive(Debug, Clone)]
pub struct MockBus {
    name: String,
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockBusState {
                registers: vec![0; BANK_SIZE * BANK_SIZE],
                failing: HashSet::new(),
                transactions: 0,
            })),
        }
    }

    /// Preset a register without counting a transaction
    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        self.state.lock().registers[slot(address, register)] = value;
    }

    pub fn register(&self, address: u8, register: u8) -> u8 {
        self.state.lock().registers[slot(address, register)]
    }

    /// Make every transaction with `address` fail until [`MockBus::recover_address`]
    pub fn fail_address(&self, address: u8) {
        self.state.lock().failing.insert(address);
    }

    pub fn recover_address(&self, address: u8) {
        self.state.lock().failing.remove(&address);
    }

    /// Completed and failed transactions so far
    pub fn transaction_count(&self) -> u64 {
        self.state.lock().transactions
    }
}

fn slot(address: u8, register: u8) -> usize {
    address as usize * BANK_SIZE + register as usize
}

#[async_trait]
impl RegisterBus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_registers(&self, address: u8, register: u8, count: usize) -> BusResult<Vec<u8>> {
        check_count(count)?;

        let mut state = self.state.lock();
        state.transactions += 1;
        if state.failing.contains(&address) {
            return Err(BusError::device(address, register, "Remote I/O error"));
        }

        let values = (0..count)
            .map(|i| state.registers[slot(address, register.wrapping_add(i as u8))])
            .collect::<Vec<_>>();
        debug!(
            "Mock read address={} register={} count={}",
            address, register, count
        );
        Ok(values)
    }

    async fn write_register(&self, address: u8, register: u8, value: u8) -> BusResult<()> {
        let mut state = self.state.lock();
        state.transactions += 1;
        if state.failing.contains(&address) {
            return Err(BusError::device(address, register, "Remote I/O error"));
        }

        state.registers[slot(address, register)] = value;
        debug!(
            "Mock write address={} register={} value={}",
            address, register, value
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let bus = MockBus::new("mock");
        bus.write_register(16, 3, 5).await.unwrap();

        assert_eq!(bus.read_registers(16, 3, 1).await.unwrap(), vec![5]);
        assert_eq!(bus.register(16, 3), 5);
        // Other devices are untouched
        assert_eq!(bus.register(17, 3), 0);
        assert_eq!(bus.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_multi_register_read_wraps_within_bank() {
        let bus = MockBus::new("mock");
        bus.set_register(32, 254, 1);
        bus.set_register(32, 255, 2);
        bus.set_register(32, 0, 3);

        assert_eq!(bus.read_registers(32, 254, 3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(bus.read_registers(32, 0, 256).await.unwrap().len(), 256);
    }

    #[tokio::test]
    async fn test_invalid_count() {
        let bus = MockBus::new("mock");
        assert!(matches!(
            bus.read_registers(1, 0, 0).await,
            Err(BusError::InvalidCount { count: 0, .. })
        ));
        assert!(bus.read_registers(1, 0, 257).await.is_err());
        assert_eq!(bus.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let bus = MockBus::new("mock");
        bus.fail_address(0x50);

        let err = bus.read_registers(0x50, 7, 2).await.unwrap_err();
        assert_eq!(err, BusError::device(0x50, 7, "Remote I/O error"));
        assert!(bus.write_register(0x50, 7, 1).await.is_err());
        assert!(bus.read_registers(0x51, 7, 1).await.is_ok());

        bus.recover_address(0x50);
        assert!(bus.read_registers(0x50, 7, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_registers() {
        let bus = MockBus::new("mock");
        let other = bus.clone();
        other.write_register(16, 1, 42).await.unwrap();
        assert_eq!(bus.read_registers(16, 1, 1).await.unwrap(), vec![42]);
    }
}
