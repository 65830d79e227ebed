//! Relay service and client config generation

use std::fs;
use std::path::{Path, PathBuf};

use chimera_core::TunnelConfig;
use chimera_settings::ManagerSettings;
use chimera_system::Host;
use tracing::info;

use crate::unit::render_unit;
use crate::{Result, SetupError};

/// Client config parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRequest {
    /// Public address of the relay
    pub relay_host: String,
    /// Relay listen port
    pub relay_port: u16,
    /// `(project_id, topic_id)` for the google handshake
    pub google: Option<(String, String)>,
}

/// Writes tunnel configs and manages the relay unit
pub struct TunnelSetup {
    settings: ManagerSettings,
    host: Host,
}

impl TunnelSetup {
    pub fn new(settings: ManagerSettings, host: Host) -> Self {
        Self { settings, host }
    }

    /// Configure this machine as a relay listening on `listen_port` and start
    /// the service. Returns the config path.
    pub fn setup_relay(&self, listen_port: u16) -> Result<PathBuf> {
        let paths = &self.settings.paths;
        let config = TunnelConfig::relay(listen_port);
        config.validate()?;

        let config_path = paths.relay_config();
        write_file(&config_path, &config.to_json_pretty()?)?;
        info!("Wrote relay config to {:?}", config_path);

        write_file(&paths.unit_path, &render_unit(&paths.binary_path, &config_path))?;
        info!("Wrote unit {:?}", paths.unit_path);

        let unit = &self.settings.relay.unit_name;
        self.host.services.daemon_reload()?;
        self.host.services.enable_now(unit)?;
        info!("Relay service {} enabled and started", unit);

        Ok(config_path)
    }

    /// Write the client-side config and return its path and contents
    pub fn generate_client_config(&self, request: &ClientRequest) -> Result<(PathBuf, String)> {
        let host = request.relay_host.trim();
        if host.is_empty() {
            return Err(SetupError::Config(chimera_core::CoreError::InvalidAddress(
                "relay address is required".to_string(),
            )));
        }

        let mut config = TunnelConfig::client(host, request.relay_port);
        if let Some((project, topic)) = &request.google {
            config = config.with_google(project.as_str(), topic.as_str());
        }
        config.validate()?;

        let json = config.to_json_pretty()?;
        let path = self.settings.paths.client_config();
        write_file(&path, &json)?;
        info!("Wrote client config to {:?}", path);
        Ok((path, json))
    }
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(SetupError::io(parent))?;
    }
    fs::write(path, content).map_err(SetupError::io(path))
}
