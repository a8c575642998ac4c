//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use timing_gateway::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[backend]
base_url = "http://tm.localhost:8080"
refresh_path = "/chipreads/rest"

[links]
reader = "ws://reader-host:8081"
scanner = "ws://scanner-host:8082"

[[links.stations]]
name = "chipreaderA"
endpoint = "ws://station-a:8083"

[[links.stations]]
name = "chipreaderB"
endpoint = "ws://station-b:8083"

[timers]
check_connected_wait_ms = 2000
reopen_socket_wait_ms = 4000
ping_interval_ms = 15000
probe_interval_ms = 250

[session]
refresh_interval_ms = 500
lock_timeout_ms = 2500

[simulation]
tick_interval_ms = 100
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.backend_base_url(), "http://tm.localhost:8080");
    assert_eq!(config.refresh_path(), "/chipreads/rest");
    assert_eq!(config.reader_endpoint(), "ws://reader-host:8081");
    assert_eq!(config.scanner_endpoint(), "ws://scanner-host:8082");
    assert_eq!(config.stations().len(), 2);
    assert_eq!(config.stations()[0].name, "chipreaderA");
    assert_eq!(config.stations()[1].endpoint, "ws://station-b:8083");
    assert_eq!(config.check_connected_wait(), Duration::from_millis(2000));
    assert_eq!(config.reopen_socket_wait(), Duration::from_millis(4000));
    assert_eq!(config.ping_interval(), Duration::from_millis(15000));
    assert_eq!(config.probe_interval(), Duration::from_millis(250));
    assert_eq!(config.refresh_interval(), Duration::from_millis(500));
    assert_eq!(config.lock_timeout(), Duration::from_millis(2500));
    assert_eq!(config.tick_interval(), Duration::from_millis(100));
}

#[test]
fn test_partial_config_uses_section_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[links]
reader = "ws://reader-host:8081"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.reader_endpoint(), "ws://reader-host:8081");
    // Everything unspecified falls back to defaults
    assert_eq!(config.scanner_endpoint(), "ws://localhost:8082");
    assert_eq!(config.reopen_socket_wait(), Duration::from_millis(5000));
    assert_eq!(config.tick_interval(), Duration::from_millis(250));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.backend_base_url(), "http://localhost:8080");
    assert_eq!(config.reader_endpoint(), "ws://localhost:8081");
    assert_eq!(config.probe_interval(), Duration::from_millis(500));
}
