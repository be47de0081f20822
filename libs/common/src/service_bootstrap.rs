//! Unified service bootstrap utilities
//!
//! Startup banner and the effective-settings report logged before the
//! listeners come up.

use std::path::PathBuf;
use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "i2cproxy")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print startup banner for the service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██╗██████╗  ██████╗██████╗ ██████╗  ██████╗ ██╗  ██╗██╗   ██╗
 ██║╚════██╗██╔════╝██╔══██╗██╔══██╗██╔═══██╗╚██╗██╔╝╚██╗ ██╔╝
 ██║ █████╔╝██║     ██████╔╝██████╔╝██║   ██║ ╚███╔╝  ╚████╔╝
 ██║██╔═══╝ ██║     ██╔═══╝ ██╔══██╗██║   ██║ ██╔██╗   ╚██╔╝
 ██║███████╗╚██████╗██║     ██║  ██║╚██████╔╝██╔╝ ██╗   ██║
 ╚═╝╚══════╝ ╚═════╝╚═╝     ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝   ╚═╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Effective process settings, reported once at startup
#[derive(Debug, Clone)]
pub struct StartupSettings {
    pub command_port: u16,
    pub poll_port: u16,
    pub bus: String,
    pub daemonize: bool,
    pub verbose: bool,
    pub log_path: Option<PathBuf>,
}

impl StartupSettings {
    /// Settings as `(label, value)` rows, in report order
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" }.to_string();
        let mut rows = vec![
            ("Cmd port", self.command_port.to_string()),
            ("Poll port", self.poll_port.to_string()),
            ("Bus", self.bus.clone()),
            ("Daemonize", yes_no(self.daemonize)),
            ("Verbose", yes_no(self.verbose)),
        ];
        if self.daemonize {
            if let Some(path) = &self.log_path {
                rows.push(("Log path", path.display().to_string()));
            }
        }
        rows
    }
}

/// Log the effective settings
pub fn print_settings(settings: &StartupSettings) {
    for (label, value) in settings.rows() {
        info!(" {:<11}{}", format!("{}:", label), value);
    }
    info!("");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_rows() {
        let settings = StartupSettings {
            command_port: 9000,
            poll_port: 9001,
            bus: "3".to_string(),
            daemonize: false,
            verbose: true,
            log_path: Some(PathBuf::from("/var/log/i2cproxy.log")),
        };
        let rows = settings.rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[1], ("Poll port", "9001".to_string()));
        assert_eq!(rows[4], ("Verbose", "yes".to_string()));
    }

    #[test]
    fn test_log_path_only_reported_when_daemonized() {
        let settings = StartupSettings {
            command_port: 9000,
            poll_port: 9001,
            bus: "3".to_string(),
            daemonize: true,
            verbose: false,
            log_path: Some(PathBuf::from("/tmp/proxy.log")),
        };
        let rows = settings.rows();
        assert_eq!(rows.last(), Some(&("Log path", "/tmp/proxy.log".to_string())));
    }
}
