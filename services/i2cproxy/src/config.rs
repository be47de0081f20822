//! Proxy configuration
//!
//! Priority (highest to lowest):
//! 1. Command line flags (applied by `bootstrap`)
//! 2. `I2CPROXY_*` environment variables (`__` separates nested keys)
//! 3. Config file passed with `--config`
//! 4. Defaults below

use std::path::Path;

use common::config_loader::load_layered;
use errors::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};

use crate::bus::MAX_REGISTER_COUNT;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "I2CPROXY_";

/// Smallest accepted `poll.batch_capacity`; fits the longest error line
/// (`4294967295: ERROR\r\n`)
pub const MIN_BATCH_CAPACITY: usize = 32;

/// Placeholder replaced by the bus number in `bus.device_template`
pub const BUS_PLACEHOLDER: &str = "{bus}";

/// Top-level proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener host for both ports
    pub bind_host: String,
    pub listen_backlog: u32,
    /// Ring capacity of each connection's line reader
    pub line_buffer_size: usize,
    /// Longest accepted command line in bytes, newline included (inclusive)
    pub max_request_len: usize,
    /// Longest reply in bytes, `\r\n` included (inclusive); larger `get`
    /// replies become `ERROR`
    pub reply_capacity: usize,
    pub max_register_count: usize,
    pub poll: PollSettings,
    pub bus: BusSettings,
}

/// Poll executor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Output batch capacity in bytes
    pub batch_capacity: usize,
    /// Records due within this window count as due now
    pub due_grace_ms: u64,
    /// Sleep when the registry is empty
    pub idle_sleep_ms: u64,
}

/// Bus device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Device node for a bus number, e.g. `/dev/i2c-{bus}`
    pub device_template: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            listen_backlog: 20,
            line_buffer_size: 4096,
            max_request_len: 255,
            reply_capacity: 255,
            max_register_count: MAX_REGISTER_COUNT,
            poll: PollSettings::default(),
            bus: BusSettings::default(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            batch_capacity: 4000,
            due_grace_ms: 20,
            idle_sleep_ms: 1_000_000,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            device_template: format!("/dev/i2c-{}", BUS_PLACEHOLDER),
        }
    }
}

impl BusSettings {
    /// Device node path for `bus`
    pub fn device_path(&self, bus: u32) -> String {
        self.device_template
            .replace(BUS_PLACEHOLDER, &bus.to_string())
    }
}

impl ProxyConfig {
    /// Load from defaults, an optional file and the environment, then validate
    pub fn load(file: Option<&Path>) -> ProxyResult<Self> {
        let config: Self = load_layered(&Self::default(), file, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if self.bind_host.trim().is_empty() {
            return Err(ProxyError::invalid_config("bind_host", "must not be empty"));
        }
        if self.listen_backlog == 0 {
            return Err(ProxyError::invalid_config("listen_backlog", "must be > 0"));
        }

        for (field, value) in [
            ("line_buffer_size", self.line_buffer_size),
            ("max_request_len", self.max_request_len),
            ("reply_capacity", self.reply_capacity),
            ("poll.batch_capacity", self.poll.batch_capacity),
        ] {
            if value == 0 {
                return Err(ProxyError::invalid_config(field, "must be > 0"));
            }
        }

        if self.poll.batch_capacity < MIN_BATCH_CAPACITY {
            return Err(ProxyError::invalid_config(
                "poll.batch_capacity",
                format!("must be at least {}", MIN_BATCH_CAPACITY),
            ));
        }
        if self.max_request_len > self.line_buffer_size {
            return Err(ProxyError::invalid_config(
                "max_request_len",
                format!(
                    "{} exceeds line_buffer_size {}",
                    self.max_request_len, self.line_buffer_size
                ),
            ));
        }
        if !(1..=MAX_REGISTER_COUNT).contains(&self.max_register_count) {
            return Err(ProxyError::invalid_config(
                "max_register_count",
                format!("must be within 1..={}", MAX_REGISTER_COUNT),
            ));
        }
        if self.poll.idle_sleep_ms == 0 {
            return Err(ProxyError::invalid_config("poll.idle_sleep_ms", "must be > 0"));
        }
        if !self.bus.device_template.contains(BUS_PLACEHOLDER) {
            return Err(ProxyError::invalid_config(
                "bus.device_template",
                format!("must contain {}", BUS_PLACEHOLDER),
            ));
        }

        Ok(())
    }
}
