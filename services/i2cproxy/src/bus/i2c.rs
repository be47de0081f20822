//! Linux I2C character device bus (`/dev/i2c-N`)
//!
//! Each transaction sets the slave address, writes the register number and
//! then transfers data. The ioctls block, so they run on the blocking pool.
//!
//! Every `write(2)` on the adapter is one I2C message. A partial write is a
//! failed transfer and is never retried.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::traits::{check_count, RegisterBus};
use crate::error::{BusError, BusResult};

/// Register bus backed by a Linux I2C adapter
pub struct I2cDevBus {
    name: String,
    device: Arc<Mutex<LinuxI2CDevice>>,
}

impl fmt::Debug for I2cDevBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cDevBus").field("name", &self.name).finish()
    }
}

impl I2cDevBus {
    /// Open the adapter device node
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LinuxI2CError> {
        let path = path.as_ref();
        info!("Opening i2c device {}", path.display());
        let device = LinuxI2CDevice::new(path, 0)?;
        Ok(Self {
            name: path.display().to_string(),
            device: Arc::new(Mutex::new(device)),
        })
    }

    async fn run<T, F>(&self, transaction: F) -> BusResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut LinuxI2CDevice) -> BusResult<T> + Send + 'static,
    {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || {
            let mut device = device.lock();
            transaction(&mut *device)
        })
        .await
        .map_err(|e| BusError::Worker(e.to_string()))?
    }
}

/// Send `data` as one message, failing unless every byte went out
fn write_message<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let written = writer.write(data)?;
    if written != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", written, data.len()),
        ));
    }
    Ok(())
}

fn write_device(device: &LinuxI2CDevice, data: &[u8]) -> io::Result<()> {
    // SAFETY: the descriptor stays owned by `device` and is never closed here
    let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(device.as_raw_fd()) });
    write_message(&mut *file, data)
}

#[async_trait]
impl RegisterBus for I2cDevBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_registers(&self, address: u8, register: u8, count: usize) -> BusResult<Vec<u8>> {
        check_count(count)?;
        debug!(
            "Reading from I2C at address={}, register={}, count={}",
            address, register, count
        );

        self.run(move |device| {
            device
                .set_slave_address(u16::from(address))
                .map_err(|e| BusError::device(address, register, format!("set slave address: {}", e)))?;
            write_device(device, &[register])
                .map_err(|e| BusError::device(address, register, format!("write register: {}", e)))?;
            let mut values = vec![0u8; count];
            device
                .read(&mut values)
                .map_err(|e| BusError::device(address, register, format!("read: {}", e)))?;
            Ok(values)
        })
        .await
    }

    async fn write_register(&self, address: u8, register: u8, value: u8) -> BusResult<()> {
        debug!(
            "Writing value {} to I2C at address={}, register={}",
            value, address, register
        );

        self.run(move |device| {
            device
                .set_slave_address(u16::from(address))
                .map_err(|e| BusError::device(address, register, format!("set slave address: {}", e)))?;
            write_device(device, &[register, value])
                .map_err(|e| BusError::device(address, register, format!("write: {}", e)))
        })
        .await
    }
}
