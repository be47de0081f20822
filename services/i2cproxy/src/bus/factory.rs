//! Bus factory
//!
//! Opens one bus handle for a service and wraps it in the shared
//! transaction lock. Failure to open is fatal at startup.

use std::sync::Arc;

use errors::{ProxyError, ProxyResult};
use tracing::info;

use super::mock::MockBus;
use super::serialized::{BusTransactionLock, SerializedBus};
use super::traits::RegisterBus;
use crate::config::BusSettings;

/// Which implementation backs the bus handles
#[derive(Debug, Clone)]
pub enum BusBackend {
    /// Linux I2C adapter named by `bus.device_template`
    Device,
    /// In-memory bank, shared by every handle opened from this backend
    Mock(MockBus),
}

/// Open a serialized handle on bus `bus_id`
pub fn open_bus(
    settings: &BusSettings,
    bus_id: u32,
    backend: &BusBackend,
    lock: &BusTransactionLock,
) -> ProxyResult<Arc<dyn RegisterBus>> {
    match backend {
        BusBackend::Mock(bank) => {
            info!("Using in-memory register bank for bus {}", bus_id);
            Ok(Arc::new(SerializedBus::new(bank.clone(), lock.clone())))
        },
        BusBackend::Device => open_device(settings, bus_id, lock),
    }
}

#[cfg(all(feature = "industrial-io", target_os = "linux"))]
fn open_device(
    settings: &BusSettings,
    bus_id: u32,
    lock: &BusTransactionLock,
) -> ProxyResult<Arc<dyn RegisterBus>> {
    let path = settings.device_path(bus_id);
    let bus = super::i2c::I2cDevBus::open(&path)
        .map_err(|e| ProxyError::bus_open(&path, e.to_string()))?;
    Ok(Arc::new(SerializedBus::new(bus, lock.clone())))
}

#[cfg(not(all(feature = "industrial-io", target_os = "linux")))]
fn open_device(
    settings: &BusSettings,
    bus_id: u32,
    _lock: &BusTransactionLock,
) -> ProxyResult<Arc<dyn RegisterBus>> {
    Err(ProxyError::bus_open(
        settings.device_path(bus_id),
        "I2C device support is not available in this build (use --mock-bus)",
    ))
}
