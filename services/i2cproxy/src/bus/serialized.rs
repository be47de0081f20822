//! Transaction-level serialization
//!
//! Two handles on the same physical bus must not interleave their
//! select/write/transfer sequences. Each handle is wrapped in a
//! [`SerializedBus`] and all wrappers for one bus share a single
//! [`BusTransactionLock`]. This lock is distinct from the poll registry lock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use super::traits::RegisterBus;
use crate::error::BusResult;

/// Shared lock held for the duration of one bus transaction
#[derive(Debug, Clone, Default)]
pub struct BusTransactionLock {
    inner: Arc<Mutex<()>>,
}

impl BusTransactionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

/// Bus wrapper that holds the transaction lock around every operation
#[derive(Debug)]
pub struct SerializedBus<B> {
    inner: B,
    lock: BusTransactionLock,
}

impl<B: RegisterBus> SerializedBus<B> {
    pub fn new(inner: B, lock: BusTransactionLock) -> Self {
        Self { inner, lock }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: RegisterBus> RegisterBus for SerializedBus<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn read_registers(&self, address: u8, register: u8, count: usize) -> BusResult<Vec<u8>> {
        let _transaction = self.lock.acquire().await;
        self.inner.read_registers(address, register, count).await
    }

    async fn write_register(&self, address: u8, register: u8, value: u8) -> BusResult<()> {
        let _transaction = self.lock.acquire().await;
        self.inner.write_register(address, register, value).await
    }
}
