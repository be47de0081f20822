//! Register bus layer
//!
//! - `traits`: the [`RegisterBus`] interface
//! - `serialized`: transaction lock shared by all handles on one bus
//! - `mock`: in-memory bus for bench testing and tests
//! - `i2c`: Linux `/dev/i2c-N` implementation (feature `industrial-io`)
//! - `factory`: opens handles at startup

pub mod factory;
#[cfg(all(feature = "industrial-io", target_os = "linux"))]
pub mod i2c;
pub mod mock;
pub mod serialized;
pub mod traits;

pub use factory::{open_bus, BusBackend};
#[cfg(all(feature = "industrial-io", target_os = "linux"))]
pub use i2c::I2cDevBus;
pub use mock::MockBus;
pub use serialized::{BusTransactionLock, SerializedBus};
pub use traits::{check_count, RegisterBus, MAX_REGISTER_COUNT};
