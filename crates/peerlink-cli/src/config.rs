//! peerlink CLI configuration
//!
//! Loaded from a TOML file (an explicit path, or `peerlink/config.toml`
//! under the user's config directory) on top of built-in defaults. Command
//! line flags override both. Every section may be partial.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use peerlink_core::{ArbiterConfig, ServiceId};

use crate::error::{CliError, Result};
use crate::lan::LanTransportConfig;

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the peerlink CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local device identity
    pub device: DeviceConfig,
    /// LAN transport settings
    pub lan: LanConfig,
    /// Arbitration timing
    pub arbitration: ArbitrationConfig,
}

/// Local device identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name shown to peers during discovery
    pub name: String,
}

/// LAN transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanConfig {
    /// Address the listening socket binds to
    pub bind_address: Ipv4Addr,
    /// TCP port for inbound connections
    pub listen_port: u16,
    /// UDP port beacons are sent to and scanned on
    pub beacon_port: u16,
    /// Destination address for beacons
    pub broadcast_address: Ipv4Addr,
    /// Interval between beacons while discoverable (milliseconds)
    pub beacon_interval_ms: u64,
}

/// Arbitration timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Service identifier; peers only see each other when these match
    pub service_id: Uuid,
    /// Discovery session length in seconds
    pub scan_window_secs: u64,
    /// Discoverability window while listening, in seconds
    pub discoverability_window_secs: u64,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "peerlink".to_string(),
        }
    }
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            listen_port: 7410,
            beacon_port: 7411,
            broadcast_address: Ipv4Addr::BROADCAST,
            beacon_interval_ms: 1000,
        }
    }
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        let defaults = ArbiterConfig::default();
        Self {
            service_id: *defaults.service_id.as_uuid(),
            scan_window_secs: defaults.scan_window.as_secs(),
            discoverability_window_secs: defaults.discoverability_window.as_secs(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("peerlink").join("config.toml"))
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, name: Option<String>, port: Option<u16>) -> Result<Self> {
        if let Some(name) = name {
            self.device.name = name;
        }
        if let Some(port) = port {
            self.lan.listen_port = port;
        }
        self.validate()?;
        Ok(self)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            return Err(CliError::Config("device.name must not be empty".to_string()));
        }
        if self.lan.listen_port == 0 {
            return Err(CliError::Config("lan.listen_port must be set".to_string()));
        }
        if self.lan.beacon_port == 0 {
            return Err(CliError::Config("lan.beacon_port must be set".to_string()));
        }
        if self.lan.listen_port == self.lan.beacon_port {
            return Err(CliError::Config(
                "lan.listen_port and lan.beacon_port must differ".to_string(),
            ));
        }
        if self.lan.beacon_interval_ms == 0 {
            return Err(CliError::Config(
                "lan.beacon_interval_ms must be positive".to_string(),
            ));
        }
        let arbitration = &self.arbitration;
        if arbitration.scan_window_secs == 0 || arbitration.discoverability_window_secs == 0 {
            return Err(CliError::Config(
                "arbitration windows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Arbiter settings derived from this configuration
    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig::new()
            .with_service_id(ServiceId(self.arbitration.service_id))
            .with_scan_window(Duration::from_secs(self.arbitration.scan_window_secs))
            .with_discoverability_window(Duration::from_secs(
                self.arbitration.discoverability_window_secs,
            ))
    }

    /// LAN transport settings derived from this configuration
    pub fn lan_config(&self) -> LanTransportConfig {
        LanTransportConfig {
            device_name: self.device.name.clone(),
            bind_address: self.lan.bind_address,
            listen_port: self.lan.listen_port,
            beacon_port: self.lan.beacon_port,
            broadcast_address: self.lan.broadcast_address,
            beacon_interval: Duration::from_millis(self.lan.beacon_interval_ms),
        }
    }
}
