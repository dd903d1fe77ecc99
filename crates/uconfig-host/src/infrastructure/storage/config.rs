//! TOML-based configuration for the `uconfig` host tool.
//!
//! The file lives in the platform-appropriate config directory:
//! - Windows:  `%APPDATA%\uConfig\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/uconfig/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/uConfig/config.toml`
//!
//! A custom path can be given on the command line with `--config`.
//!
//! # Example file
//!
//! ```toml
//! [discovery]
//! port = 8003
//! bind_address = "0.0.0.0"
//! tick_interval_ms = 250
//! max_ttl_ticks = 180
//!
//! [connector]
//! event_timeout_secs = 45
//! max_scan_misses = 3
//! interface = "wlan0"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every field has a default, so a partial file (or no file at all) works.
//! Values are validated when they are turned into runtime settings, not when
//! the file is parsed.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uconfig_core::{DISCOVERY_PORT, MAX_TTL, RECEIVE_BUFFER_SIZE};

use crate::application::connect_network::ConnectorSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field parsed but holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Beacon listener and registry decay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// UDP port devices broadcast beacons to.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Address the listener binds.  `"0.0.0.0"` listens on all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Largest datagram accepted intact, in bytes.
    #[serde(default = "default_receive_buffer")]
    pub receive_buffer_bytes: usize,
    /// Period of the TTL decay tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Ticks a device survives without a beacon.
    #[serde(default = "default_max_ttl_ticks")]
    pub max_ttl_ticks: u16,
}

/// Provisioning-network connector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_event_timeout_secs")]
    pub event_timeout_secs: u64,
    #[serde(default = "default_max_scan_misses")]
    pub max_scan_misses: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Silence tolerated once associated.  Absent means no watchdog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_watchdog_secs: Option<u64>,
    /// Wireless interface to drive.  Absent means the first Wi-Fi device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_receive_buffer() -> usize {
    RECEIVE_BUFFER_SIZE
}
fn default_tick_interval_ms() -> u64 {
    250
}
fn default_max_ttl_ticks() -> u16 {
    MAX_TTL
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_event_timeout_secs() -> u64 {
    45
}
fn default_max_scan_misses() -> u32 {
    3
}
fn default_queue_capacity() -> usize {
    32
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            bind_address: default_bind_address(),
            receive_buffer_bytes: default_receive_buffer(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ttl_ticks: default_max_ttl_ticks(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            event_timeout_secs: default_event_timeout_secs(),
            max_scan_misses: default_max_scan_misses(),
            queue_capacity: default_queue_capacity(),
            association_watchdog_secs: None,
            interface: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions to runtime settings ───────────────────────────────────────────

impl DiscoveryConfig {
    /// Socket address the beacon listener binds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .trim()
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                field: "discovery.bind_address",
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Decay tick period; never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// TTL granted on every beacon; never zero.
    pub fn max_ttl(&self) -> u16 {
        self.max_ttl_ticks.max(1)
    }
}

impl ConnectorConfig {
    /// Builds controller settings, applying `interface` separately.
    pub fn to_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            event_timeout: Duration::from_secs(self.event_timeout_secs.max(1)),
            max_scan_misses: self.max_scan_misses.max(1),
            association_watchdog: self.association_watchdog_secs.map(Duration::from_secs),
            queue_capacity: self.queue_capacity.max(1),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from the default location, or defaults when absent.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("uConfig"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("uConfig")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("uconfig"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("uconfig_test_{tag}_{}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn test_app_config_default_matches_wire_constants() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.discovery.port, 8003);
        assert_eq!(cfg.discovery.receive_buffer_bytes, 256);
        assert_eq!(cfg.discovery.max_ttl_ticks, 180);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_default_connector_config_matches_default_settings() {
        let settings = ConnectorConfig::default().to_settings();
        let expected = ConnectorSettings::default();

        assert_eq!(settings.settle_delay, expected.settle_delay);
        assert_eq!(settings.event_timeout, expected.event_timeout);
        assert_eq!(settings.max_scan_misses, expected.max_scan_misses);
        assert_eq!(settings.association_watchdog, None);
        assert_eq!(settings.queue_capacity, expected.queue_capacity);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty file is valid");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_named_fields() {
        // Arrange
        let toml_str = r#"
[discovery]
port = 9000

[connector]
association_watchdog_secs = 20
interface = "wlan1"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.discovery.port, 9000);
        assert_eq!(cfg.discovery.bind_address, "0.0.0.0");
        assert_eq!(cfg.connector.interface.as_deref(), Some("wlan1"));
        assert_eq!(
            cfg.connector.to_settings().association_watchdog,
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_addr_combines_address_and_port() {
        let cfg = DiscoveryConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 4000,
            ..DiscoveryConfig::default()
        };

        assert_eq!(cfg.bind_addr().unwrap(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        let cfg = DiscoveryConfig {
            bind_address: "localhost".to_string(),
            ..DiscoveryConfig::default()
        };

        assert!(matches!(
            cfg.bind_addr(),
            Err(ConfigError::Invalid {
                field: "discovery.bind_address",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_values_are_clamped_to_usable_minimums() {
        let discovery = DiscoveryConfig {
            tick_interval_ms: 0,
            max_ttl_ticks: 0,
            ..DiscoveryConfig::default()
        };
        let connector = ConnectorConfig {
            queue_capacity: 0,
            max_scan_misses: 0,
            ..ConnectorConfig::default()
        };

        assert_eq!(discovery.tick_interval(), Duration::from_millis(1));
        assert_eq!(discovery.max_ttl(), 1);
        assert_eq!(connector.to_settings().queue_capacity, 1);
        assert_eq!(connector.to_settings().max_scan_misses, 1);
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");

        let cfg = load_config_from(&path).expect("missing file is not an error");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips_through_disk() {
        // Arrange
        let path = temp_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.discovery.port = 12345;
        cfg.connector.interface = Some("wlan0".to_string());
        cfg.logging.level = "debug".to_string();

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_from_malformed_file_is_parse_error() {
        let path = temp_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[discovery\nport = ").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
