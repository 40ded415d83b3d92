//! Configuration file support for hlflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HLFLASH_*)
//! 3. Local config file (./hlflash.toml)
//! 4. Global config file (~/.config/hlflash/config.toml)
//!
//! ```toml
//! [connection]
//! serial = "/dev/ttyUSB0"
//! baud = 115200
//! flow_control = "hardware"
//!
//! [update]
//! assume_yes = false
//! max_nack_retries = 20
//! ```

use directories::ProjectDirs;
use hlflash::FlowControl;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "hlflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Flow control mode.
    pub flow_control: Option<FlowControl>,
}

/// Update configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Skip the firmware version confirmation.
    #[serde(default)]
    pub assume_yes: bool,
    /// Give up after this many retransmissions of one packet.
    pub max_nack_retries: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateConfig,
}

impl Config {
    /// Load configuration from the global and local config files.
    pub fn load() -> Self {
        Self::load_layers(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG_FILE),
        )
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

    /// Merge `local` over `global`. Missing files are skipped.
    fn load_layers(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hlflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.flow_control.is_some() {
            self.connection.flow_control = other.connection.flow_control;
        }

        if other.update.assume_yes {
            self.update.assume_yes = true;
        }
        if other.update.max_nack_retries.is_some() {
            self.update.max_nack_retries = other.update.max_nack_retries;
        }
    }
}
