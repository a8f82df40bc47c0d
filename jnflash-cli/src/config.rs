//! Configuration file support for jnflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (JNFLASH_*)
//! 3. Local config file (./jnflash.toml)
//! 4. Global config file (~/.config/jnflash/config.toml)
//!
//! The first two are resolved by clap; this module merges the files.

use directories::ProjectDirs;
use jnflash::ProtocolVariant;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG_FILE: &str = "jnflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Response timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default monitor image.
    pub image: Option<PathBuf>,
    /// Protocol variant.
    pub variant: Option<ProtocolVariant>,
    /// Target sector for the fixed variant.
    pub sector: Option<u8>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {e}", path.display()))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Parse TOML configuration text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "jnflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields in `other` win.
    fn merge(&mut self, other: Self) {
        let Self { connection, flash } = other;

        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.timeout_ms.is_some() {
            self.connection.timeout_ms = connection.timeout_ms;
        }

        if flash.image.is_some() {
            self.flash.image = flash.image;
        }
        if flash.variant.is_some() {
            self.flash.variant = flash.variant;
        }
        if flash.sector.is_some() {
            self.flash.sector = flash.sector;
        }
    }

    /// Remember `port` in the local config file, keeping its other settings.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<PathBuf> {
        let path = PathBuf::from(LOCAL_CONFIG_FILE);
        let mut local = Self::load_from_file(&path).unwrap_or_default();
        local.connection.port = Some(port.to_string());

        fs::write(&path, toml::to_string_pretty(&local)?)?;
        info!("Saved port {port} to {}", path.display());

        self.connection.port = Some(port.to_string());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.flash.variant.is_none());
        assert!(config.flash.sector.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::parse(
            r#"
[connection]
port = "/dev/ttyUSB0"
baud = 38400
timeout_ms = 2000

[flash]
image = "mon5169.bin"
variant = "scan"
sector = 8
"#,
        )
        .unwrap();

        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(38400));
        assert_eq!(config.connection.timeout_ms, Some(2000));
        assert_eq!(config.flash.image, Some(PathBuf::from("mon5169.bin")));
        assert_eq!(config.flash.variant, Some(ProtocolVariant::Scan));
        assert_eq!(config.flash.sector, Some(8));
    }

    #[test]
    fn test_dual_sector_variant_name() {
        let config = Config::parse("[flash]\nvariant = \"dual-sector\"\n").unwrap();
        assert_eq!(config.flash.variant, Some(ProtocolVariant::DualSector));
    }

    #[test]
    fn test_config_from_empty_toml() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_variant_rejected() {
        assert!(Config::parse("[flash]\nvariant = \"v4\"\n").is_err());
    }

    #[test]
    fn test_config_merge_overrides_set_fields_only() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.connection.baud = Some(38400);

        let mut other = Config::default();
        other.connection.baud = Some(115200);
        other.flash.variant = Some(ProtocolVariant::Fixed);

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(115200));
        assert_eq!(base.flash.variant, Some(ProtocolVariant::Fixed));
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.port = Some("COM3".to_string());
        config.flash.variant = Some(ProtocolVariant::DualSector);
        config.flash.sector = Some(0);

        let serialized = toml::to_string_pretty(&config).unwrap();
        assert!(serialized.contains("dual-sector"));
        assert_eq!(Config::parse(&serialized).unwrap(), config);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nport = \"/dev/ttyUSB1\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("jnflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
