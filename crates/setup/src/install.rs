//! Install and uninstall

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chimera_settings::ManagerSettings;
use chimera_system::Host;
use tracing::{info, warn};

use crate::{Result, SetupError};

/// Where install put things
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub binary: PathBuf,
    pub manager: PathBuf,
}

/// What uninstall removed, and what it could not undo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Installs the relay binary and the manager, and removes everything again
pub struct Installer {
    settings: ManagerSettings,
    host: Host,
}

impl Installer {
    pub fn new(settings: ManagerSettings, host: Host) -> Self {
        Self { settings, host }
    }

    /// The manager has been copied to its install path
    pub fn is_installed(&self) -> bool {
        self.settings.paths.manager_path.exists()
    }

    /// Install dependencies, fetch the relay binary and install the manager.
    ///
    /// `manager_source` is the running executable; when absent the manager is
    /// downloaded from its release URL instead.
    pub fn install(&self, manager_source: Option<&Path>) -> Result<InstallReport> {
        let paths = &self.settings.paths;
        let release = &self.settings.release;

        self.host.packages.install(&release.packages)?;
        info!("Dependencies installed");

        let binary_temp = paths.download_dir.join("chimera");
        self.fetch(&release.binary_url, &binary_temp)?;
        install_executable(&binary_temp, &paths.binary_path, true)?;
        info!("Relay binary installed to {:?}", paths.binary_path);

        match manager_source {
            Some(source) => install_executable(source, &paths.manager_path, false)?,
            None => {
                let manager_temp = paths.download_dir.join("chimera-manager");
                self.fetch(&release.manager_url, &manager_temp)?;
                install_executable(&manager_temp, &paths.manager_path, true)?;
            }
        }
        info!("Manager installed to {:?}", paths.manager_path);

        Ok(InstallReport {
            binary: paths.binary_path.clone(),
            manager: paths.manager_path.clone(),
        })
    }

    /// Stop the relay and delete every file the manager created.
    ///
    /// Keeps going past individual failures; they are collected as warnings.
    pub fn uninstall(&self) -> UninstallReport {
        let paths = &self.settings.paths;
        let unit = &self.settings.relay.unit_name;
        let mut report = UninstallReport::default();

        if paths.unit_path.exists() {
            if let Err(e) = self.host.services.disable_now(unit) {
                report.warnings.push(format!("stopping {}: {}", unit, e));
            }
        }

        for path in [
            &paths.unit_path,
            &paths.nat_rules_file,
            &paths.binary_path,
            &paths.manager_path,
        ] {
            remove_path(path, &mut report);
        }
        remove_path(&paths.config_dir, &mut report);

        if let Err(e) = self.host.services.daemon_reload() {
            report.warnings.push(format!("daemon-reload: {}", e));
        }
        if let Err(e) = self.host.packet_filter.reload() {
            report.warnings.push(format!("packet filter reload: {}", e));
        }

        for warning in &report.warnings {
            warn!("Uninstall: {}", warning);
        }
        info!("Uninstall removed {} path(s)", report.removed.len());
        report
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(SetupError::io(parent))?;
        }
        self.host.downloader.download(url, dest)?;
        Ok(())
    }
}

/// Copy or move `source` to `dest` and mark it 0755
fn install_executable(source: &Path, dest: &Path, move_source: bool) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(SetupError::io(parent))?;
    }

    let moved = move_source && fs::rename(source, dest).is_ok();
    if !moved {
        fs::copy(source, dest).map_err(SetupError::io(dest))?;
        if move_source {
            if let Err(e) = fs::remove_file(source) {
                warn!("Could not remove download {:?}: {}", source, e);
            }
        }
    }

    fs::set_permissions(dest, fs::Permissions::from_mode(0o755)).map_err(SetupError::io(dest))
}

fn remove_path(path: &Path, report: &mut UninstallReport) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => report.removed.push(path.to_path_buf()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => report.warnings.push(format!("removing {:?}: {}", path, e)),
    }
}
