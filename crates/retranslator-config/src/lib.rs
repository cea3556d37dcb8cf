//! Configuration and logging bootstrap for the retranslator service.

mod config;
mod error;
mod logging;

pub use config::{
    AckMode, AppConfig, BrokerConfig, ConnectionsConfig, DatabaseConfig, DatabaseDriver,
    EngineConfig, LoggingConfig, MetricsConfig, ProjectConfig, DEFAULT_CONFIG_PATH,
    ENV_DATABASE_URL, ENV_LOG_LEVEL, ENV_REDIS_URL,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, parse_level};
