//! Logging infrastructure for warden
//!
//! Provides unified logging setup using the tracing ecosystem. Every
//! warden process logs to stderr by default so that the supervising parent,
//! the supervised worker and the CLI worker all share the invoking terminal.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, Result, WardenError};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "WARDEN_LOG";

const DEFAULT_LOG_FILE: &str = "warden.log";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file under the state directory
    File,
    /// Log to both stderr and file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "debug", "warden_server=debug,tokio=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
    /// Log file name under the log directory, `warden.log` when unset
    pub file_name: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
            file_name: None,
        }
    }
}

impl LogConfig {
    /// Config for the launching process (arbitration, delegation, supervision)
    pub fn launcher() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env("info"),
            span_events: false,
            file_line: false,
            file_name: None,
        }
    }

    /// Config for a supervised worker running the server body
    pub fn worker() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env("info"),
            span_events: true,
            file_line: true,
            file_name: Some("worker.log".into()),
        }
    }

    /// Config for the one-shot CLI worker; its stdout carries command output
    pub fn cli_worker() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env("warn"),
            span_events: false,
            file_line: false,
            file_name: None,
        }
    }
}

fn filter_from_env(default: &str) -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| default.into())
}

/// Install the global subscriber described by `config`.
///
/// Fails with a config error for an unparsable filter and with an internal
/// error when a subscriber is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| {
        WardenError::config(format!("Invalid log filter '{}': {}", config.filter, e))
    })?;

    let span_events = if config.span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let log_file = match config.output {
        LogOutput::Stderr => None,
        LogOutput::File | LogOutput::Both => Some(open_log_file(
            config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE),
        )?),
    };
    let to_stderr = matches!(config.output, LogOutput::Stderr | LogOutput::Both);

    let stderr_layer = to_stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(span_events.clone())
            .with_file(config.file_line)
            .with_line_number(config.file_line)
    });
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_span_events(span_events)
            .with_file(config.file_line)
            .with_line_number(config.file_line)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| WardenError::internal(format!("Logging already initialized: {}", e)))
}

fn open_log_file(file_name: &str) -> Result<std::fs::File> {
    let log_path = paths::log_dir().join(file_name);
    paths::ensure_parent(&log_path).map_err(|e| WardenError::FileWrite {
        path: log_path.clone(),
        source: e,
    })?;

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| WardenError::FileWrite {
            path: log_path,
            source: e,
        })
}
