use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            paths: PathsConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Substring matched against the lspci description of each
    /// Ethernet controller. The first match is authoritative.
    pub signature: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            signature: "RTL8111/8168/8211/8411".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// The ifupdown configuration file that names the bridge port.
    pub interfaces_file: PathBuf,
    /// Where timestamped copies are kept before each rewrite.
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            interfaces_file: PathBuf::from("/etc/network/interfaces"),
            backup_dir: PathBuf::from("/etc/network/backup"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unit restarted after a successful rewrite.
    pub networking_unit: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            networking_unit: "networking.service".to_string(),
        }
    }
}
