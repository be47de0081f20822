//! I2C register proxy
//!
//! Exposes one register bus to TCP clients with a line-based text protocol
//! on the command port, and streams scheduled register reads to a
//! monitoring client on the poll port (command port + 1).
//!
//! - `line_reader`: newline framing over a fixed ring buffer
//! - `commands`: request parsing and dispatch
//! - `poll`: poll records, the shared registry and the poll executor
//! - `bus`: register bus trait, transaction lock and implementations
//! - `server`: command and poll accept loops
//! - `service`: wiring of the above for the binary

pub mod bootstrap;
pub mod bus;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod line_reader;
pub mod poll;
pub mod server;
pub mod service;

pub use config::ProxyConfig;
pub use error::{BusError, BusResult};
pub use service::{Ports, ProxyService};
