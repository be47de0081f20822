//! Unified logging module for the proxy
//!
//! Console output plus an optional log file (used in daemon mode), both
//! rendered with the bracketed level format.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use errors::{ProxyError, ProxyResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::Writer,
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Command connection accepted from 10.0.0.7`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer flushing for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, also the tracing target raised to `console_level`
    pub service_name: String,
    /// Level for the service's own target
    pub console_level: Level,
    /// Write to stdout
    pub console: bool,
    /// Additional log file (daemon mode)
    pub log_file: Option<PathBuf>,
    /// Colored level tags on the console
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            console_level: Level::INFO,
            console: true,
            log_file: None,
            ansi: true,
        }
    }
}

/// Filter used when `RUST_LOG` is not set.
///
/// Dependencies stay at `info`; the service target follows the configured level.
pub fn default_filter(service_name: &str, level: Level) -> String {
    let base = if level > Level::INFO { Level::INFO } else { level };
    format!(
        "{},{}={}",
        base.as_str().to_lowercase(),
        service_name.replace('-', "_"),
        level.as_str().to_lowercase()
    )
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes priority over the configured level.
pub fn init_with_config(config: LogConfig) -> ProxyResult<()> {
    let filter_str = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| default_filter(&config.service_name, config.console_level));
    let env_filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| ProxyError::Logging(format!("Invalid filter '{}': {}", filter_str, e)))?;

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_ansi(config.ansi)
            .event_format(BracketedLevelFormat)
    });

    let file_layer = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path.file_name().ok_or_else(|| {
                ProxyError::Logging(format!("Log path has no file name: {}", path.display()))
            })?;
            std::fs::create_dir_all(&dir)?;

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => poisoned.into_inner().push(guard),
            }

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat),
            )
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProxyError::Logging(e.to_string()))?;

    tracing::debug!("Logging initialized with filter '{}'", filter_str);
    Ok(())
}

/// Flush and close file writers. Call once before the process exits.
pub fn shutdown() {
    if let Some(guards) = GUARDS.get() {
        let drained: Vec<WorkerGuard> = match guards.lock() {
            Ok(mut guards) => guards.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        drop(drained);
    }
}
