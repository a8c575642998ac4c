//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument,
//! default: config/dev.toml. Missing sections and fields fall back to the
//! defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the results backend
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,
    /// Path of the table refresh read, relative to base_url
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Path of the run-creation endpoint, relative to base_url
    #[serde(default = "default_run_create_path")]
    pub run_create_path: String,
}

fn default_backend_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_refresh_path() -> String {
    "/results/rest".to_string()
}

fn default_run_create_path() -> String {
    "/admin/_creategetsimulationrun".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
            refresh_path: default_refresh_path(),
            run_create_path: default_run_create_path(),
        }
    }
}

/// A per-station chip reader bridge
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationConfig {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinksConfig {
    /// Chip/tag reader process endpoint
    #[serde(default = "default_reader_endpoint")]
    pub reader: String,
    /// Barcode scanner process endpoint
    #[serde(default = "default_scanner_endpoint")]
    pub scanner: String,
    /// Additional per-station chip reader bridges
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

fn default_reader_endpoint() -> String {
    "ws://localhost:8081".to_string()
}

fn default_scanner_endpoint() -> String {
    "ws://localhost:8082".to_string()
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            reader: default_reader_endpoint(),
            scanner: default_scanner_endpoint(),
            stations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimersConfig {
    /// How long a freshly opened link may stay not-ready before it is
    /// treated as silently failed
    #[serde(default = "default_check_connected_wait_ms")]
    pub check_connected_wait_ms: u64,
    /// Fixed delay before reattaching a failed link
    #[serde(default = "default_reopen_socket_wait_ms")]
    pub reopen_socket_wait_ms: u64,
    /// Keepalive ping interval
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Registry is_connected probe interval
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

fn default_check_connected_wait_ms() -> u64 {
    3000
}

fn default_reopen_socket_wait_ms() -> u64 {
    5000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_probe_interval_ms() -> u64 {
    500
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            check_connected_wait_ms: default_check_connected_wait_ms(),
            reopen_socket_wait_ms: default_reopen_socket_wait_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Fixed refresh period
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Critical section acquire timeout
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Replay tick period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    250
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { tick_interval_ms: default_tick_interval_ms() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    backend_base_url: String,
    refresh_path: String,
    run_create_path: String,
    reader_endpoint: String,
    scanner_endpoint: String,
    stations: Vec<StationConfig>,
    check_connected_wait_ms: u64,
    reopen_socket_wait_ms: u64,
    ping_interval_ms: u64,
    probe_interval_ms: u64,
    refresh_interval_ms: u64,
    lock_timeout_ms: u64,
    tick_interval_ms: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml: TomlConfig, config_file: &str) -> Self {
        Self {
            backend_base_url: toml.backend.base_url,
            refresh_path: toml.backend.refresh_path,
            run_create_path: toml.backend.run_create_path,
            reader_endpoint: toml.links.reader,
            scanner_endpoint: toml.links.scanner,
            stations: toml.links.stations,
            check_connected_wait_ms: toml.timers.check_connected_wait_ms,
            reopen_socket_wait_ms: toml.timers.reopen_socket_wait_ms,
            ping_interval_ms: toml.timers.ping_interval_ms,
            probe_interval_ms: toml.timers.probe_interval_ms,
            refresh_interval_ms: toml.session.refresh_interval_ms,
            lock_timeout_ms: toml.session.lock_timeout_ms,
            tick_interval_ms: toml.simulation.tick_interval_ms,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let toml: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(Self::from_toml(toml, &path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults if the file
    /// is missing or unparseable
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn backend_base_url(&self) -> &str {
        &self.backend_base_url
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn run_create_path(&self) -> &str {
        &self.run_create_path
    }

    pub fn reader_endpoint(&self) -> &str {
        &self.reader_endpoint
    }

    pub fn scanner_endpoint(&self) -> &str {
        &self.scanner_endpoint
    }

    pub fn stations(&self) -> &[StationConfig] {
        &self.stations
    }

    pub fn check_connected_wait(&self) -> Duration {
        Duration::from_millis(self.check_connected_wait_ms)
    }

    pub fn reopen_socket_wait(&self) -> Duration {
        Duration::from_millis(self.reopen_socket_wait_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reader_endpoint(), "ws://localhost:8081");
        assert_eq!(config.scanner_endpoint(), "ws://localhost:8082");
        assert_eq!(config.check_connected_wait(), Duration::from_millis(3000));
        assert_eq!(config.reopen_socket_wait(), Duration::from_millis(5000));
        assert_eq!(config.probe_interval(), Duration::from_millis(500));
        assert_eq!(config.refresh_interval(), Duration::from_millis(1000));
        assert_eq!(config.lock_timeout(), Duration::from_millis(5000));
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert!(config.stations().is_empty());
    }

    #[test]
    fn test_from_toml_keeps_station_order() {
        let toml: TomlConfig = toml::from_str(
            r#"
[[links.stations]]
name = "chipreaderA"
endpoint = "ws://station-a:8083"

[[links.stations]]
name = "chipreaderB"
endpoint = "ws://station-b:8083"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml, "test");
        assert_eq!(config.stations()[0].name, "chipreaderA");
        assert_eq!(config.stations()[1].name, "chipreaderB");
    }
}
