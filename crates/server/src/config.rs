//! Server configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the USB/IP listener binds
    #[serde(default = "ServerSettings::default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    /// Pending connection queue length
    #[serde(default = "ServerSettings::default_backlog")]
    pub backlog: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            log_level: Self::default_log_level(),
            backlog: Self::default_backlog(),
        }
    }
}

impl ServerSettings {
    fn default_bind_addr() -> String {
        "0.0.0.0:3240".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_backlog() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Unit reported to device list requests
    #[serde(default = "UsbSettings::default_list_unit")]
    pub list_unit: String,
    /// VID:PID patterns of devices that may be exported (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Transfer timeout in milliseconds (0 = wait indefinitely)
    #[serde(default)]
    pub transfer_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            list_unit: Self::default_list_unit(),
            filters: Vec::new(),
            transfer_timeout_ms: 0,
        }
    }
}

impl UsbSettings {
    fn default_list_unit() -> String {
        "0".to_string()
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Where the loaded configuration came from
#[derive(Debug)]
pub enum ConfigOrigin {
    File(PathBuf),
    /// No file in any standard location
    Defaults,
    /// A file was found but could not be used
    Fallback(anyhow::Error),
}

impl ServerConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::search_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        Self::load_file(&config_path)
    }

    /// Load the first configuration file found, or the defaults
    ///
    /// Nothing is logged here; the returned [`ConfigOrigin`] says what
    /// happened so it can be reported once logging is set up.
    pub fn load_or_default() -> (Self, ConfigOrigin) {
        Self::load_first(&Self::search_paths())
    }

    fn load_first(candidates: &[PathBuf]) -> (Self, ConfigOrigin) {
        let Some(path) = candidates.iter().find(|p| p.exists()) else {
            return (Self::default(), ConfigOrigin::Defaults);
        };

        match Self::load_file(path) {
            Ok(config) => (config, ConfigOrigin::File(path.clone())),
            Err(e) => (Self::default(), ConfigOrigin::Fallback(e)),
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Standard configuration locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/usbip-server/server.toml"),
        ]
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-server").join("server.toml")
        } else {
            PathBuf::from(".config/usbip-server/server.toml")
        }
    }

    /// Parsed listener address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind_addr))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.bind_addr()?;

        if self.server.backlog == 0 {
            return Err(anyhow!("Listen backlog must be at least 1"));
        }

        let unit = &self.usb.list_unit;
        if unit.is_empty() || !unit.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!(
                "Invalid list_unit '{}', must be a decimal unit number",
                unit
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let hex_part = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| {
                anyhow!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                    name,
                    id
                )
            })?;

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Expand `~` in a user-supplied config path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load a config file, expanding `~` in the path
pub fn load_config(path: &str) -> Result<ServerConfig> {
    ServerConfig::load(Some(expand_path(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.bind_addr, "0.0.0.0:3240");
        assert_eq!(config.server.backlog, 10);
        assert_eq!(config.usb.list_unit, "0");
        assert_eq!(config.usb.transfer_timeout(), Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(ServerConfig::validate_filter("0x1234:0x5678").is_ok());
        assert!(ServerConfig::validate_filter("0x1234:*").is_ok());
        assert!(ServerConfig::validate_filter("*:0x5678").is_ok());
        assert!(ServerConfig::validate_filter("*:*").is_ok());
        assert!(ServerConfig::validate_filter("0xABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(ServerConfig::validate_filter("1234:5678").is_err());
        assert!(ServerConfig::validate_filter("0x1234").is_err());
        assert!(ServerConfig::validate_filter("0x1234:0x5678:0x9abc").is_err());
        assert!(ServerConfig::validate_filter("0xGHIJ:0x5678").is_err());
        assert!(ServerConfig::validate_filter("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.log_level, parsed.server.log_level);
        assert_eq!(config.server.bind_addr, parsed.server.bind_addr);
        assert_eq!(config.usb.list_unit, parsed.usb.list_unit);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ServerConfig::default();
        config.server.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_list_unit() {
        let mut config = ServerConfig::default();
        config.usb.list_unit = "12".to_string();
        assert!(config.validate().is_ok());

        config.usb.list_unit = "usb0".to_string();
        assert!(config.validate().is_err());

        config.usb.list_unit = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bind_addr_and_backlog() {
        let mut config = ServerConfig::default();
        config.server.bind_addr = "localhost".to_string();
        assert!(config.validate().is_err());

        config.server.bind_addr = "[::1]:3240".to_string();
        assert!(config.validate().is_ok());

        config.server.backlog = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_first_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let (config, origin) = ServerConfig::load_first(&[dir.path().join("absent.toml")]);
        assert!(matches!(origin, ConfigOrigin::Defaults));
        assert_eq!(config.server.bind_addr, "0.0.0.0:3240");
    }

    #[test]
    fn test_load_first_takes_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second.toml");
        fs::write(&second, "[server]\nbacklog = 3\n").unwrap();

        let (config, origin) =
            ServerConfig::load_first(&[dir.path().join("first.toml"), second.clone()]);
        assert!(matches!(origin, ConfigOrigin::File(ref p) if *p == second));
        assert_eq!(config.server.backlog, 3);
    }

    #[test]
    fn test_load_first_falls_back_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "[server]\nlog_level = \"loud\"\n").unwrap();

        let (config, origin) = ServerConfig::load_first(&[path]);
        let ConfigOrigin::Fallback(e) = origin else {
            panic!("bad file accepted");
        };
        assert!(format!("{:#}", e).contains("Invalid config file"));
        assert_eq!(config.server.log_level, "info");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("[usb]\nfilters = [\"0x0781:*\"]\n").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3240");
        assert_eq!(config.usb.list_unit, "0");
        assert_eq!(config.usb.filters, vec!["0x0781:*".to_string()]);
    }
}
