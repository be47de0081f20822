//! Scheduled register polling
//!
//! `addpoll` puts a [`PollRecord`] into the [`SharedRegistry`]; the
//! [`PollExecutor`] serving the poll port drains due records and streams
//! their values to the monitoring client.

pub mod executor;
pub mod record;
pub mod registry;

pub use executor::{format_error_line, format_values_line, PollExecutor, SessionEnd};
pub use record::{align_to_second, PollRecord};
pub use registry::{PollRegistry, SharedRegistry};
