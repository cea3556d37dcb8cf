//! Logging initialization for the service.
//!
//! Thin wrapper over the `observability` package that picks level, format
//! and destination from [`AppConfig`].

use crate::{AppConfig, ConfigResult};

/// Install the global subscriber. `level_override` (the `--log-level` flag)
/// wins over the configured level; `RUST_LOG` wins over both.
pub fn init_logging(config: &AppConfig, level_override: Option<&str>) -> ConfigResult<()> {
    let level = level_override.unwrap_or_else(|| config.log_level());

    observability::init_with_config(observability::LogConfig {
        service_name: config.project.name.clone(),
        default_level: level.to_string(),
        format: config.log_format()?,
        log_path: config.logging.file.clone(),
        also_stderr: config.logging.file.is_some(),
    })?;
    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "error" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_all_variants() {
        assert_eq!(parse_level("trace"), Some(tracing::Level::TRACE));
        assert_eq!(parse_level("debug"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level("info"), Some(tracing::Level::INFO));
        assert_eq!(parse_level("warn"), Some(tracing::Level::WARN));
        assert_eq!(parse_level("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level("Error"), Some(tracing::Level::ERROR));
    }

    #[test]
    fn parse_level_unknown() {
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("verbose"), None);
    }
}
