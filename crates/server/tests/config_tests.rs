//! Integration tests for configuration files
//!
//! Tests server config parsing from disk, including:
//! - Minimal and full files
//! - Save and reload
//! - Invalid configuration handling

use std::fs;
use std::time::Duration;

use server::config::{ServerConfig, load_config};
use tempfile::tempdir;

const MINIMAL_SERVER_CONFIG: &str = r#"
[server]
bind_addr = "127.0.0.1:3240"
"#;

const FULL_SERVER_CONFIG: &str = r#"
[server]
bind_addr = "0.0.0.0:4000"
log_level = "debug"
backlog = 32

[usb]
list_unit = "2"
filters = ["0x0781:*", "*:0x5678"]
transfer_timeout_ms = 5000
"#;

#[test]
fn test_parse_minimal_server_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, MINIMAL_SERVER_CONFIG).unwrap();

    let config = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:3240");
    assert_eq!(config.server.log_level, "info");
    assert_eq!(config.server.backlog, 10);
    assert_eq!(config.usb.list_unit, "0");
    assert!(config.usb.filters.is_empty());
}

#[test]
fn test_parse_full_server_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, FULL_SERVER_CONFIG).unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(config.bind_addr().unwrap().port(), 4000);
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.server.backlog, 32);
    assert_eq!(config.usb.list_unit, "2");
    assert_eq!(config.usb.filters.len(), 2);
    assert_eq!(config.usb.transfer_timeout(), Duration::from_secs(5));
}

#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("server.toml");

    let mut config = ServerConfig::default();
    config.server.bind_addr = "127.0.0.1:3241".to_string();
    config.usb.filters = vec!["0x1234:0x5678".to_string()];
    config.save(&path).unwrap();

    let loaded = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.server.bind_addr, "127.0.0.1:3241");
    assert_eq!(loaded.usb.filters, vec!["0x1234:0x5678".to_string()]);
}

#[test]
fn test_missing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = ServerConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}

#[test]
fn test_invalid_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, "[server\nbind_addr = ").unwrap();

    let err = ServerConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "[server]\nlog_level = \"verbose\"\n",
        "[server]\nbind_addr = \"nowhere\"\n",
        "[server]\nbacklog = 0\n",
        "[usb]\nlist_unit = \"usb0\"\n",
        "[usb]\nfilters = [\"1234:5678\"]\n",
    ];

    let dir = tempdir().unwrap();
    for (index, content) in cases.iter().enumerate() {
        let path = dir.path().join(format!("case{}.toml", index));
        fs::write(&path, content).unwrap();
        let err = ServerConfig::load(Some(path)).unwrap_err();
        assert!(
            format!("{:#}", err).contains("Invalid config file"),
            "case {} accepted: {}",
            index,
            content
        );
    }
}
