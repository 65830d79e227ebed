//! Chimera Settings
//!
//! Manager configuration for the Chimera relay tooling.
//!
//! ## Features
//!
//! - Every filesystem location the manager touches (binary, configs, rule files)
//! - Release URLs for the relay binary and the manager itself
//! - NAT table and backend service names
//! - JSON serialization, with all fields defaulted
//!
//! ## Usage
//!
//! ```no_run
//! use chimera_settings::ManagerSettings;
//!
//! // Load or create default settings
//! let mut settings = ManagerSettings::load_or_default()?;
//!
//! // Modify settings
//! settings.nat.table_name = "relay_nat".to_string();
//!
//! // Save settings
//! settings.save()?;
//! # Ok::<(), chimera_settings::SettingsError>(())
//! ```

mod config;

pub use config::{ManagerSettings, NatSettings, PathSettings, ReleaseSettings, RelaySettings};

use std::path::PathBuf;

use thiserror::Error;

/// Directory holding the manager's own state
pub const DEFAULT_CONFIG_DIR: &str = "/etc/chimera";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR).join("manager.json")
}
