//! Configuration file management
//!
//! Loads TOML configuration files and provides daemon settings.
//! Default config path: ~/.config/kmsseat/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::BackendChoice;

/// Daemon settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session backend settings
    pub session: SessionConfig,
    /// GPU selection
    pub gpu: GpuConfig,
    /// Logging settings
    pub log: LogConfig,
}

/// Session backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// "auto" (default), "seatd" or "direct"
    pub backend: BackendChoice,
}

/// GPU selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Card node to open instead of running discovery (empty = discover)
    pub device: String,
}

impl GpuConfig {
    pub fn device_path(&self) -> Option<&Path> {
        let device = self.device.trim();
        (!device.is_empty()).then(|| Path::new(device))
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log every drm change routed to the selected GPU
    pub hotplug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { hotplug: true }
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/kmsseat/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. KMSSEAT_CONFIG environment variable
        if let Ok(path) = std::env::var("KMSSEAT_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/kmsseat/config.toml
        if let Some(config_path) = default_config_path() {
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. KMSSEAT_CONFIG environment variable
    /// 2. ~/.config/kmsseat/config.toml (user config)
    /// 3. /etc/kmsseat/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kmsseat").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.session.backend, BackendChoice::Auto);
        assert!(config.gpu.device_path().is_none());
        assert!(config.log.hotplug);
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
            [session]
            backend = "direct"

            [gpu]
            device = "/dev/dri/card1"

            [log]
            hotplug = false
            "#,
        )
        .unwrap();
        assert_eq!(config.session.backend, BackendChoice::Direct);
        assert_eq!(config.gpu.device_path(), Some(Path::new("/dev/dri/card1")));
        assert!(!config.log.hotplug);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::parse("[session]\nbackend = \"logind\"\n").is_err());
    }

    #[test]
    fn test_blank_device_means_discover() {
        let config = Config::parse("[gpu]\ndevice = \"  \"\n").unwrap();
        assert!(config.gpu.device_path().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("kmsseat-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[session]\nbackend = \"seatd\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.session.backend, BackendChoice::Seatd);

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(format!("{}", err).contains("Failed to read config file"));
    }
}
