//! Chimera App Framework
//!
//! Standard initialization for Chimera binaries: logging, settings and the
//! startup banner, in that order.
//!
//! ## Usage
//!
//! ```no_run
//! use chimera_app::App;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::builder()
//!         .name("chimera-manager")
//!         .verbose(true)
//!         .build()?;
//!
//!     // Access initialized components
//!     let settings = app.settings();
//!     println!("rules live in {:?}", settings.paths.rule_store);
//!
//!     Ok(())
//! }
//! ```

mod builder;

pub use builder::AppBuilder;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use chimera_settings::ManagerSettings;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Settings error: {0}")]
    Settings(#[from] chimera_settings::SettingsError),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Initialized Chimera application
pub struct App {
    name: String,
    version: String,
    settings: Arc<ManagerSettings>,
}

impl App {
    /// Create a new app builder
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Get the application name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the application version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get manager settings
    pub fn settings(&self) -> Arc<ManagerSettings> {
        self.settings.clone()
    }

    /// Log startup banner
    pub fn log_startup(&self) {
        info!("{} {}", self.name, self.version);
        info!("Rule store: {:?}", self.settings.paths.rule_store);
        info!("NAT rule file: {:?}", self.settings.paths.nat_rules_file);
    }
}
