//! Command parsing and dispatch
//!
//! One request line in, one reply out. Replies are `\r\n` terminated:
//!
//! | command | reply |
//! |---|---|
//! | `ping` | `OK` |
//! | `get <address> <register> [count]` | space-separated values |
//! | `set <address> <register> <value>` | `OK` |
//! | `addpoll <delayMs> <address> <register> [count]` | `OK <id>` |
//! | `rmpoll <id>` | `OK` |
//! | `help` | usage text |
//!
//! Anything malformed, unknown or failing on the bus gets `ERROR`.

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::RegisterBus;
use crate::clock::Clock;
use crate::poll::{PollRecord, SharedRegistry};

pub const OK_REPLY: &str = "OK\r\n";
pub const ERROR_REPLY: &str = "ERROR\r\n";

pub const HELP_TEXT: &str = "Valid commands are:\r\n\
ping\r\n\
get <address> <register> [register count]\r\n\
set <address> <register> <value>\r\n\
addpoll <delay in ms> <address> <register> [register count]\r\n\
rmpoll <poll id>\r\n\
help\r\n";

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Get {
        address: u8,
        register: u8,
        count: usize,
    },
    Set {
        address: u8,
        register: u8,
        value: u8,
    },
    AddPoll {
        delay_ms: u64,
        address: u8,
        register: u8,
        count: usize,
    },
    RmPoll {
        id: u32,
    },
    Help,
}

/// Why a request line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Incorrect arguments for '{command}': {reason}")]
    BadArguments {
        command: &'static str,
        reason: String,
    },
}

/// Cursor over the arguments of one command
struct Args<'a> {
    command: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn bad(&self, reason: impl Into<String>) -> CommandError {
        CommandError::BadArguments {
            command: self.command,
            reason: reason.into(),
        }
    }

    fn required<T: FromStr>(&mut self, name: &str) -> Result<T, CommandError> {
        let token = self
            .tokens
            .next()
            .ok_or_else(|| self.bad(format!("missing {}", name)))?;
        token
            .parse()
            .map_err(|_| self.bad(format!("invalid {} '{}'", name, token)))
    }

    fn optional<T: FromStr>(&mut self, name: &str, default: T) -> Result<T, CommandError> {
        match self.tokens.next() {
            Some(token) => token
                .parse()
                .map_err(|_| self.bad(format!("invalid {} '{}'", name, token))),
            None => Ok(default),
        }
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.tokens.next() {
            Some(extra) => Err(self.bad(format!("unexpected argument '{}'", extra))),
            None => Ok(()),
        }
    }

    fn count(&mut self, max_count: usize) -> Result<usize, CommandError> {
        let count: usize = self.optional("register count", 1)?;
        if count == 0 || count > max_count {
            return Err(self.bad(format!("register count {} outside 1..={}", count, max_count)));
        }
        Ok(count)
    }
}

impl Command {
    /// Parse a request line with its line terminator already removed
    pub fn parse(line: &str, max_count: usize) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or_default();

        let command = match name {
            "ping" => "ping",
            "get" => "get",
            "set" => "set",
            "addpoll" => "addpoll",
            "rmpoll" => "rmpoll",
            "help" => "help",
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        let mut args = Args { command, tokens };

        let parsed = match command {
            "ping" => Command::Ping,
            "help" => Command::Help,
            "get" => Command::Get {
                address: args.required("slave address")?,
                register: args.required("register")?,
                count: args.count(max_count)?,
            },
            "set" => Command::Set {
                address: args.required("slave address")?,
                register: args.required("register")?,
                value: args.required("value")?,
            },
            "addpoll" => {
                let delay_ms: u64 = args.required("delay")?;
                if delay_ms == 0 {
                    return Err(args.bad("delay must be at least 1 ms"));
                }
                Command::AddPoll {
                    delay_ms,
                    address: args.required("slave address")?,
                    register: args.required("register")?,
                    count: args.count(max_count)?,
                }
            },
            _ => Command::RmPoll {
                id: args.required("poll id")?,
            },
        };

        args.finish()?;
        Ok(parsed)
    }
}

/// Strip the trailing CR/LF of a request line
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(&['\r', '\n'][..])
}

/// Executes commands against the bus and the poll registry
pub struct CommandDispatcher {
    bus: Arc<dyn RegisterBus>,
    registry: Arc<SharedRegistry>,
    clock: Arc<dyn Clock>,
    reply_capacity: usize,
    max_register_count: usize,
}

impl CommandDispatcher {
    pub fn new(
        bus: Arc<dyn RegisterBus>,
        registry: Arc<SharedRegistry>,
        clock: Arc<dyn Clock>,
        reply_capacity: usize,
        max_register_count: usize,
    ) -> Self {
        Self {
            bus,
            registry,
            clock,
            reply_capacity,
            max_register_count,
        }
    }

    /// Handle one request line and produce its reply
    pub async fn dispatch(&self, line: &str) -> String {
        let request = strip_line_ending(line);
        match Command::parse(request, self.max_register_count) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                warn!("{}", e);
                ERROR_REPLY.to_string()
            },
        }
    }

    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Ping => OK_REPLY.to_string(),
            Command::Help => HELP_TEXT.to_string(),
            Command::Get {
                address,
                register,
                count,
            } => self.get(address, register, count).await,
            Command::Set {
                address,
                register,
                value,
            } => match self.bus.write_register(address, register, value).await {
                Ok(()) => OK_REPLY.to_string(),
                Err(e) => {
                    warn!("Error writing value {}: {}", value, e);
                    ERROR_REPLY.to_string()
                },
            },
            Command::AddPoll {
                delay_ms,
                address,
                register,
                count,
            } => {
                let record = PollRecord::new(delay_ms, address, register, count);
                let id = self.registry.add(record, self.clock.now_ms());
                debug!(
                    "Added poll {} every {} ms for address={}, register={}, count={}",
                    id, delay_ms, address, register, count
                );
                format!("OK {}\r\n", id)
            },
            Command::RmPoll { id } => match self.registry.remove(id) {
                Some(_) => {
                    debug!("Removed poll {}", id);
                    OK_REPLY.to_string()
                },
                None => {
                    warn!("No poll with id {}", id);
                    ERROR_REPLY.to_string()
                },
            },
        }
    }

    async fn get(&self, address: u8, register: u8, count: usize) -> String {
        let values = match self.bus.read_registers(address, register, count).await {
            Ok(values) => values,
            Err(e) => {
                warn!("Error reading {} value(s): {}", count, e);
                return ERROR_REPLY.to_string();
            },
        };

        let mut reply = String::with_capacity(self.reply_capacity);
        let mut digits = itoa::Buffer::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                reply.push(' ');
            }
            reply.push_str(digits.format(*value));
        }
        reply.push_str("\r\n");

        if reply.len() > self.reply_capacity {
            warn!(
                "Reply for {} registers is {} bytes, over the {} byte limit",
                count,
                reply.len(),
                self.reply_capacity
            );
            return ERROR_REPLY.to_string();
        }
        reply
    }
}
