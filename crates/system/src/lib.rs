//! Chimera System Interfaces
//!
//! Narrow traits over the OS facilities the manager drives, so the rule
//! logic can run against fakes in tests.
//!
//! ## Interfaces
//!
//! - **PortQuerier**: listening TCP/UDP ports (`ss -tuln`)
//! - **InterfaceResolver**: default-route egress interface (`ip route`)
//! - **PacketFilterBackend**: nftables service reload/restart (`systemctl`)
//! - **ServiceController**: relay unit lifecycle (`systemctl`)
//! - **PackageInstaller**: dependency install (`apt-get`)
//! - **Downloader**: release artifact fetch (`curl`)
//! - **Privileges**: effective uid check (`geteuid`)
//!
//! Every call blocks until the external command exits. There are no timeouts.

mod command;
pub mod fake;
mod linux;

pub use linux::{
    AptInstaller, CurlDownloader, EffectiveUid, IpRouteResolver, NftablesService,
    SsPortQuerier, Systemctl,
};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected output: {0}")]
    Parse(String),

    #[error("No default route found")]
    NoDefaultRoute,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SystemError>;

/// Process privilege level
pub trait Privileges: Send + Sync {
    /// Running as the superuser
    fn is_root(&self) -> bool;
}

/// Snapshot of listening sockets
pub trait PortQuerier: Send + Sync {
    /// Ports with a TCP listener or a bound UDP socket, system-wide
    fn listening_ports(&self) -> Result<BTreeSet<u16>>;
}

/// Egress interface lookup
pub trait InterfaceResolver: Send + Sync {
    /// Interface carrying the default route
    fn default_interface(&self) -> Result<String>;
}

/// Packet-filter service that loads rules from its main config
pub trait PacketFilterBackend: Send + Sync {
    /// Reload the full ruleset
    fn reload(&self) -> Result<()>;

    /// Restart the service
    fn restart(&self) -> Result<()>;
}

/// Service manager
pub trait ServiceController: Send + Sync {
    /// Re-read unit files
    fn daemon_reload(&self) -> Result<()>;

    /// Enable the unit and start it now
    fn enable_now(&self, unit: &str) -> Result<()>;

    /// Stop and disable the unit
    fn disable_now(&self, unit: &str) -> Result<()>;
}

/// OS package manager
pub trait PackageInstaller: Send + Sync {
    /// Install packages, refreshing the index first
    fn install(&self, packages: &[String]) -> Result<()>;
}

/// Transfer utility
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `dest`, following redirects
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Every OS collaborator the manager needs, behind trait objects
#[derive(Clone)]
pub struct Host {
    pub ports: Arc<dyn PortQuerier>,
    pub routes: Arc<dyn InterfaceResolver>,
    pub packet_filter: Arc<dyn PacketFilterBackend>,
    pub services: Arc<dyn ServiceController>,
    pub packages: Arc<dyn PackageInstaller>,
    pub downloader: Arc<dyn Downloader>,
    pub privileges: Arc<dyn Privileges>,
}

impl Host {
    /// Real Linux implementations; `backend_service` names the nftables unit
    pub fn linux(backend_service: &str) -> Self {
        Self {
            ports: Arc::new(SsPortQuerier),
            routes: Arc::new(IpRouteResolver),
            packet_filter: Arc::new(NftablesService::new(backend_service)),
            services: Arc::new(Systemctl),
            packages: Arc::new(AptInstaller),
            downloader: Arc::new(CurlDownloader),
            privileges: Arc::new(EffectiveUid),
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
