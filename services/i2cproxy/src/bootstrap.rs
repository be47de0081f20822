//! Process bootstrap
//!
//! Command line parsing, daemonization and logging setup. Everything here
//! runs before the async runtime exists.

use std::path::{Path, PathBuf};

use clap::Parser;
use common::logging::{self, LogConfig};
use common::service_bootstrap::StartupSettings;
use errors::ProxyResult;
use tracing::Level;

use crate::bus::{BusBackend, MockBus};
use crate::service::Ports;

pub const SERVICE_NAME: &str = "i2cproxy";
pub const DEFAULT_LOG_PATH: &str = "/var/log/i2cproxy.log";

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "i2cproxy",
    version = env!("CARGO_PKG_VERSION"),
    about = "Exposes an I2C bus over TCP. The poll port is the command port + 1.",
    long_about = None
)]
pub struct Args {
    /// Command port; poll results are served on port + 1
    #[arg(short = 'p', long)]
    pub port: u16,

    /// I2C bus number (/dev/i2c-N)
    #[arg(short = 'b', long)]
    pub bus: u32,

    /// Log every request and reply
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Detach and run in the background
    #[arg(short = 'd', long)]
    pub daemonize: bool,

    /// Log file used when daemonized
    #[arg(short = 'l', long, default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Configuration file (toml, yaml or json)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Serve an in-memory register bank instead of the hardware bus
    #[arg(long)]
    pub mock_bus: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    pub fn ports(&self) -> ProxyResult<Ports> {
        Ports::adjacent(self.port)
    }

    pub fn backend(&self) -> BusBackend {
        if self.mock_bus {
            BusBackend::Mock(MockBus::new(format!("mock-{}", self.bus)))
        } else {
            BusBackend::Device
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            service_name: SERVICE_NAME.to_string(),
            console_level: if self.verbose { Level::DEBUG } else { Level::INFO },
            console: !self.daemonize,
            log_file: self.daemonize.then(|| self.log_path.clone()),
            ansi: !self.no_color && !self.daemonize,
        }
    }

    pub fn startup_settings(&self, ports: Ports) -> StartupSettings {
        StartupSettings {
            command_port: ports.command,
            poll_port: ports.poll,
            bus: if self.mock_bus {
                format!("{} (mock)", self.bus)
            } else {
                self.bus.to_string()
            },
            daemonize: self.daemonize,
            verbose: self.verbose,
            log_path: Some(self.log_path.clone()),
        }
    }
}

pub fn initialize_logging(args: &Args) -> ProxyResult<()> {
    logging::init_with_config(args.log_config())
}

/// Detach from the terminal.
///
/// The parent exits with status 0. The child starts a new session, resets
/// its umask, reads stdin from `/dev/null` and writes stdout/stderr to
/// `log_path`. Must run before any threads (including the tokio runtime)
/// are started.
#[cfg(unix)]
pub fn daemonize(log_path: &Path) -> ProxyResult<()> {
    use errors::ProxyError;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let daemon_err = |what: &str, e: io::Error| ProxyError::Daemonize(format!("{}: {}", what, e));

    let log = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o644)
        .open(log_path)
        .map_err(|e| daemon_err(&format!("Couldn't open log file {}", log_path.display()), e))?;
    let null = File::open("/dev/null").map_err(|e| daemon_err("Couldn't open /dev/null", e))?;

    // SAFETY: no other threads exist yet
    match unsafe { libc::fork() } {
        -1 => return Err(daemon_err("fork failed", io::Error::last_os_error())),
        0 => {},
        _ => std::process::exit(0),
    }

    // SAFETY: plain syscalls on descriptors owned by this process
    unsafe {
        if libc::setsid() < 0 {
            return Err(daemon_err("setsid failed", io::Error::last_os_error()));
        }
        libc::umask(0o022);

        for (source, target) in [
            (null.as_raw_fd(), libc::STDIN_FILENO),
            (log.as_raw_fd(), libc::STDOUT_FILENO),
            (log.as_raw_fd(), libc::STDERR_FILENO),
        ] {
            if libc::dup2(source, target) < 0 {
                return Err(daemon_err("dup2 failed", io::Error::last_os_error()));
            }
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_log_path: &Path) -> ProxyResult<()> {
    Err(errors::ProxyError::Daemonize(
        "daemon mode is only supported on Unix".to_string(),
    ))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_required_arguments() {
        assert!(Args::try_parse_from(["i2cproxy"]).is_err());
        assert!(Args::try_parse_from(["i2cproxy", "-p", "9000"]).is_err());
        assert!(Args::try_parse_from(["i2cproxy", "-b", "1"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["i2cproxy", "-p", "9000", "-b", "3"]).unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.bus, 3);
        assert!(!args.verbose && !args.daemonize && !args.mock_bus);
        assert_eq!(args.log_path, PathBuf::from(DEFAULT_LOG_PATH));

        let ports = args.ports().unwrap();
        assert_eq!((ports.command, ports.poll), (9000, 9001));
        assert!(matches!(args.backend(), BusBackend::Device));
    }

    #[test]
    fn test_last_port_rejected() {
        let args = Args::try_parse_from(["i2cproxy", "-p", "65535", "-b", "3"]).unwrap();
        assert!(args.ports().is_err());
    }

    #[test]
    fn test_daemon_logging_goes_to_file() {
        let args = Args::try_parse_from([
            "i2cproxy", "-p", "9000", "-b", "3", "-d", "-v", "-l", "/tmp/proxy.log",
        ])
        .unwrap();
        let config = args.log_config();
        assert!(!config.console);
        assert!(!config.ansi);
        assert_eq!(config.console_level, Level::DEBUG);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/proxy.log")));
    }

    #[test]
    fn test_startup_settings() {
        let args =
            Args::try_parse_from(["i2cproxy", "--port", "7000", "--bus", "2", "--mock-bus"]).unwrap();
        let settings = args.startup_settings(args.ports().unwrap());
        assert_eq!(settings.poll_port, 7001);
        assert_eq!(settings.bus, "2 (mock)");
        assert!(matches!(args.backend(), BusBackend::Mock(_)));
    }
}
