//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory, writes it back on request and falls back
//! to built-in defaults when no file exists yet.

pub mod config;

pub use config::{
    config_file_path, load_config, load_config_from, save_config_to, AppConfig, ConfigError,
    ConnectorConfig, DiscoveryConfig, LoggingConfig,
};
