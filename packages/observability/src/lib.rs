//! # Observability
//!
//! Logging setup shared by the retranslator binaries.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. The output is chosen here:
//!
//! - `compact`: human readable lines on stdout
//! - `json`: one JSON object per line, on stdout or appended to a file
//!
//! `RUST_LOG` overrides the configured level when set.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "retranslator".into(),
//!     default_level: "debug".into(),
//!     format: observability::LogFormat::Json,
//!     ..Default::default()
//! })?;
//! tracing::info!("service started");
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::FileLogWriter;

use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid log filter '{0}'")]
    Filter(String),

    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Line format of the primary output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" | "pretty" => Ok(Self::Compact),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSON line.
    pub service_name: String,

    /// Default level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by the `RUST_LOG` environment variable.
    pub default_level: String,

    pub format: LogFormat,

    /// Append JSON lines to this file instead of stdout.
    pub log_path: Option<PathBuf>,

    /// Also emit compact lines to stderr when writing to a file.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let filter = build_filter(&config.default_level)?;

    match (&config.log_path, config.format) {
        (Some(path), _) => {
            let writer = FileLogWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            let stderr_layer = config.also_stderr.then(|| {
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_filter(EnvFilter::new("info"))
            });

            tracing_subscriber::registry()
                .with(JsonLayer::new(config.service_name.clone(), writer).with_filter(filter))
                .with(stderr_layer)
                .try_init()
                .map_err(|e| InitError::Install(e.to_string()))?;

            tracing::info!(log_path = %path.display(), "observability initialized");
        }
        (None, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(JsonLayer::new(config.service_name.clone(), std::io::stdout).with_filter(filter))
                .try_init()
                .map_err(|e| InitError::Install(e.to_string()))?;
        }
        (None, LogFormat::Compact) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .compact()
                .try_init()
                .map_err(|e| InitError::Install(e.to_string()))?;
        }
    }

    Ok(())
}

/// `RUST_LOG` when set, otherwise `default_level`.
fn build_filter(default_level: &str) -> Result<EnvFilter, InitError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_level).map_err(|_| InitError::Filter(default_level.to_string()))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

pub use tracing::Level;
