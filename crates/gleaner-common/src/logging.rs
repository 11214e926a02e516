//! Logging Configuration and Initialization
//!
//! One subscriber for the whole process, installed by the binary at
//! startup. Library crates only emit `tracing` events; they never touch
//! the subscriber.
//!
//! Output goes either to the console (stderr, so record output on stdout
//! stays clean) or to a daily-rotated file in a directory of the
//! operator's choosing. Both support text and JSON formats, and the
//! `RUST_LOG`-style filter syntax via `LOG_FILTER` or
//! [`LogConfig::with_filter`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Output target for logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogOutput {
    /// Write to stderr
    #[default]
    Console,
    /// Write to a daily-rotated file inside the given directory
    Directory(PathBuf),
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "-" | "console" | "stderr" => Ok(LogOutput::Console),
            dir => Ok(LogOutput::Directory(PathBuf::from(dir))),
        }
    }
}

impl std::fmt::Display for LogOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogOutput::Console => write!(f, "console"),
            LogOutput::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Output target (console or file directory)
    pub output: LogOutput,

    /// Log file name prefix (e.g., "gleaner" -> "gleaner.2024-01-18.log")
    pub file_prefix: String,

    /// Additional filter directives (e.g., "sqlx=warn,reqwest=debug")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            output: LogOutput::Console,
            file_prefix: "gleaner".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// - `LOG_LEVEL`: trace, debug, info, warn, error
    /// - `LOG_FORMAT`: text, json
    /// - `LOG_OUTPUT`: `-` (console) or a directory path
    /// - `LOG_FILE_PREFIX`: prefix for rotated log files
    /// - `LOG_FILTER`: extra filter directives
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.output = output.parse()?;
        }

        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            config.file_prefix = prefix;
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directives = Some(filter.into());
        self
    }
}

/// Initialize the global tracing subscriber
///
/// Call once at process start. When logging to a file, the returned
/// [`WorkerGuard`] must stay alive for the lifetime of the process or
/// buffered log lines are lost on exit.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .trim()
                    .parse()
                    .context("Failed to parse log filter directive")?,
            );
        }
    }

    match &config.output {
        LogOutput::Console => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE);

            match config.format {
                LogFormat::Text => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer)
                        .try_init()?;
                },
                LogFormat::Json => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer.json())
                        .try_init()?;
                },
            }

            Ok(None)
        },
        LogOutput::Directory(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;

            let file_appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(false); // No ANSI colors in files

            match config.format {
                LogFormat::Text => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer)
                        .try_init()?;
                },
                LogFormat::Json => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt_layer.json())
                        .try_init()?;
                },
            }

            Ok(Some(guard))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("-".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("console".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!(
            "/var/log/gleaner".parse::<LogOutput>().unwrap(),
            LogOutput::Directory(PathBuf::from("/var/log/gleaner"))
        );
    }

    #[test]
    fn test_config_fluent_overrides() {
        let config = LogConfig::default()
            .with_level(LogLevel::Debug)
            .with_format(LogFormat::Json)
            .with_output(LogOutput::Directory(PathBuf::from("./logs")))
            .with_file_prefix("nightly")
            .with_filter("sqlx=warn");

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Directory(PathBuf::from("./logs")));
        assert_eq!(config.file_prefix, "nightly");
        assert_eq!(config.filter_directives.as_deref(), Some("sqlx=warn"));
    }
}
