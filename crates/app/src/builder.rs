//! App builder for fluent initialization

use std::path::PathBuf;
use std::sync::Arc;

use chimera_logging::{try_init as try_init_logging, LogLevel};
use chimera_settings::ManagerSettings;

use crate::{App, Result};

/// Builder for creating Chimera applications
pub struct AppBuilder {
    name: Option<String>,
    version: Option<String>,
    verbose: bool,
    settings_path: Option<PathBuf>,
    settings: Option<ManagerSettings>,
    skip_logging: bool,
    skip_banner: bool,
}

impl AppBuilder {
    /// Create a new app builder
    pub fn new() -> Self {
        Self {
            name: None,
            version: None,
            verbose: false,
            settings_path: None,
            settings: None,
            skip_logging: false,
            skip_banner: false,
        }
    }

    /// Set the application name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the application version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Enable verbose logging (debug level)
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Load settings from this file instead of the default location
    pub fn settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    /// Use these settings instead of loading from disk
    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Skip logging initialization (useful for tests)
    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    /// Skip startup banner
    pub fn skip_banner(mut self) -> Self {
        self.skip_banner = true;
        self
    }

    /// Build the application
    pub fn build(self) -> Result<App> {
        let name = self.name.unwrap_or_else(|| "chimera-manager".to_string());
        let version = self.version.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        // Initialize logging
        if !self.skip_logging {
            let level = if self.verbose {
                LogLevel::Debug
            } else {
                LogLevel::Info
            };

            // Try to initialize, ignore if already initialized
            let _ = try_init_logging(level);
        }

        // Load settings
        let settings = match (self.settings, self.settings_path) {
            (Some(settings), _) => settings,
            (None, Some(path)) => ManagerSettings::load_from(&path)?,
            (None, None) => ManagerSettings::load_or_default()?,
        };

        let app = App {
            name,
            version,
            settings: Arc::new(settings),
        };

        // Log startup banner
        if !self.skip_banner && !self.skip_logging {
            app.log_startup();
        }

        Ok(app)
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
