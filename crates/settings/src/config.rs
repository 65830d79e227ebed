//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathSettings,

    /// Release artifacts
    #[serde(default)]
    pub release: ReleaseSettings,

    /// NAT generation and packet-filter backend
    #[serde(default)]
    pub nat: NatSettings,

    /// Relay service
    #[serde(default)]
    pub relay: RelaySettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl ManagerSettings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: ManagerSettings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Defaults with every path moved under `root`.
    ///
    /// Used to run the manager against a scratch directory instead of `/`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            paths: PathSettings::default().rebased(root),
            ..Default::default()
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Installed relay binary
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,

    /// Installed manager executable
    #[serde(default = "default_manager_path")]
    pub manager_path: PathBuf,

    /// Directory for relay/client configs and the rule store
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Persisted forwarding rules
    #[serde(default = "default_rule_store")]
    pub rule_store: PathBuf,

    /// Generated nftables rule file
    #[serde(default = "default_nat_rules_file")]
    pub nat_rules_file: PathBuf,

    /// nftables main configuration
    #[serde(default = "default_backend_config")]
    pub backend_config: PathBuf,

    /// systemd unit for the relay binary
    #[serde(default = "default_unit_path")]
    pub unit_path: PathBuf,

    /// Scratch directory for downloads
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_binary_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/chimera")
}

fn default_manager_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/chimera-manager")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(crate::DEFAULT_CONFIG_DIR)
}

fn default_rule_store() -> PathBuf {
    default_config_dir().join("forwarding_rules.json")
}

fn default_nat_rules_file() -> PathBuf {
    PathBuf::from("/etc/nftables.d/chimera-nat.nft")
}

fn default_backend_config() -> PathBuf {
    PathBuf::from("/etc/nftables.conf")
}

fn default_unit_path() -> PathBuf {
    PathBuf::from("/etc/systemd/system/chimera.service")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            manager_path: default_manager_path(),
            config_dir: default_config_dir(),
            rule_store: default_rule_store(),
            nat_rules_file: default_nat_rules_file(),
            backend_config: default_backend_config(),
            unit_path: default_unit_path(),
            download_dir: default_download_dir(),
        }
    }
}

impl PathSettings {
    /// Directory holding the generated rule file
    pub fn nat_rules_dir(&self) -> PathBuf {
        self.nat_rules_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Relay-side tunnel config
    pub fn relay_config(&self) -> PathBuf {
        self.config_dir.join("relay.json")
    }

    /// Client-side tunnel config
    pub fn client_config(&self) -> PathBuf {
        self.config_dir.join("client.json")
    }

    fn rebased(self, root: &Path) -> Self {
        let rebase = |path: PathBuf| match path.strip_prefix("/") {
            Ok(relative) => root.join(relative),
            Err(_) => root.join(path),
        };
        Self {
            binary_path: rebase(self.binary_path),
            manager_path: rebase(self.manager_path),
            config_dir: rebase(self.config_dir),
            rule_store: rebase(self.rule_store),
            nat_rules_file: rebase(self.nat_rules_file),
            backend_config: rebase(self.backend_config),
            unit_path: rebase(self.unit_path),
            download_dir: rebase(self.download_dir),
        }
    }
}

/// Release artifacts fetched during install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// Pre-built relay binary
    #[serde(default = "default_binary_url")]
    pub binary_url: String,

    /// Manager executable, used when the running one cannot be copied
    #[serde(default = "default_manager_url")]
    pub manager_url: String,

    /// OS packages the manager depends on
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
}

fn default_binary_url() -> String {
    "https://github.com/Nima786/chimera-tunnel/releases/download/v0.1.0/chimera".to_string()
}

fn default_manager_url() -> String {
    "https://github.com/Nima786/chimera-tunnel/releases/download/v0.1.0/chimera-manager"
        .to_string()
}

fn default_packages() -> Vec<String> {
    vec!["nftables".to_string(), "curl".to_string()]
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            binary_url: default_binary_url(),
            manager_url: default_manager_url(),
            packages: default_packages(),
        }
    }
}

/// NAT generation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatSettings {
    /// nftables table owned by the manager
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// systemd service wrapping the packet-filter backend
    #[serde(default = "default_backend_service")]
    pub backend_service: String,
}

fn default_table_name() -> String {
    "chimera_nat".to_string()
}

fn default_backend_service() -> String {
    "nftables".to_string()
}

impl Default for NatSettings {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            backend_service: default_backend_service(),
        }
    }
}

/// Relay service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// systemd unit name
    #[serde(default = "default_unit_name")]
    pub unit_name: String,

    /// Listen port offered when setting up the relay
    #[serde(default = "default_listen_port")]
    pub default_listen_port: u16,
}

fn default_unit_name() -> String {
    "chimera".to_string()
}

fn default_listen_port() -> u16 {
    7000
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            unit_name: default_unit_name(),
            default_listen_port: default_listen_port(),
        }
    }
}
