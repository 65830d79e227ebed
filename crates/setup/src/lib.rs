//! Chimera Setup
//!
//! Host provisioning around the relay binary: install, relay service setup,
//! client config generation and uninstall. All OS effects go through
//! [`chimera_system::Host`].

mod install;
mod tunnel;
mod unit;

pub use install::{InstallReport, Installer, UninstallReport};
pub use tunnel::{ClientRequest, TunnelSetup};
pub use unit::render_unit;

use chimera_core::CoreError;
use chimera_system::SystemError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("System command failed: {0}")]
    System(#[from] SystemError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl SetupError {
    pub(crate) fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SetupError>;
