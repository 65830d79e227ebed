//! In-memory stand-ins for the OS interfaces
//!
//! Each fake records what it was asked to do so tests can assert on the
//! sequence of external effects without touching the machine.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    Downloader, Host, InterfaceResolver, PackageInstaller, PacketFilterBackend, PortQuerier,
    Privileges, Result, ServiceController, SystemError,
};

fn failed(command: &str) -> SystemError {
    SystemError::CommandFailed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "simulated failure".to_string(),
    }
}

/// Fixed set of listening ports
#[derive(Debug, Default)]
pub struct FakePorts {
    listening: Mutex<BTreeSet<u16>>,
    queries: AtomicUsize,
}

impl FakePorts {
    pub fn new(listening: impl IntoIterator<Item = u16>) -> Self {
        Self {
            listening: Mutex::new(listening.into_iter().collect()),
            queries: AtomicUsize::new(0),
        }
    }

    /// Start listening on another port
    pub fn bind(&self, port: u16) {
        self.listening.lock().insert(port);
    }

    /// Number of snapshots taken
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl PortQuerier for FakePorts {
    fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.listening.lock().clone())
    }
}

/// Fixed default interface, or none at all
#[derive(Debug)]
pub struct FakeRoutes {
    interface: Mutex<Option<String>>,
}

impl FakeRoutes {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: Mutex::new(Some(interface.to_string())),
        }
    }

    pub fn set(&self, interface: Option<&str>) {
        *self.interface.lock() = interface.map(str::to_string);
    }
}

impl InterfaceResolver for FakeRoutes {
    fn default_interface(&self) -> Result<String> {
        self.interface.lock().clone().ok_or(SystemError::NoDefaultRoute)
    }
}

/// Call made against [`FakePacketFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCall {
    Reload,
    Restart,
}

/// Packet-filter backend with switchable failures
#[derive(Debug, Default)]
pub struct FakePacketFilter {
    fail_reload: AtomicBool,
    fail_restart: AtomicBool,
    calls: Mutex<Vec<FilterCall>>,
}

impl FakePacketFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FilterCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl PacketFilterBackend for FakePacketFilter {
    fn reload(&self) -> Result<()> {
        self.calls.lock().push(FilterCall::Reload);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(failed("systemctl reload nftables"));
        }
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        self.calls.lock().push(FilterCall::Restart);
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(failed("systemctl restart nftables"));
        }
        Ok(())
    }
}

/// Service manager that records every request as `"<verb> <unit>"`
#[derive(Debug, Default)]
pub struct FakeServices {
    calls: Mutex<Vec<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ServiceController for FakeServices {
    fn daemon_reload(&self) -> Result<()> {
        self.calls.lock().push("daemon-reload".to_string());
        Ok(())
    }

    fn enable_now(&self, unit: &str) -> Result<()> {
        self.calls.lock().push(format!("enable {}", unit));
        Ok(())
    }

    fn disable_now(&self, unit: &str) -> Result<()> {
        self.calls.lock().push(format!("disable {}", unit));
        Ok(())
    }
}

/// Package manager that remembers what it installed
#[derive(Debug, Default)]
pub struct FakePackages {
    installed: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakePackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().clone()
    }
}

impl PackageInstaller for FakePackages {
    fn install(&self, packages: &[String]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("apt-get install"));
        }
        self.installed.lock().extend(packages.iter().cloned());
        Ok(())
    }
}

/// Downloader that writes fixed bytes to the destination
#[derive(Debug, Default)]
pub struct FakeDownloader {
    body: Vec<u8>,
    downloads: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeDownloader {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.downloads.lock().clone()
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        std::fs::write(dest, &self.body)?;
        self.downloads
            .lock()
            .push((url.to_string(), dest.to_path_buf()));
        Ok(())
    }
}

/// Switchable privilege level
#[derive(Debug)]
pub struct FakePrivileges {
    root: AtomicBool,
}

impl FakePrivileges {
    pub fn new(root: bool) -> Self {
        Self {
            root: AtomicBool::new(root),
        }
    }

    pub fn set_root(&self, root: bool) {
        self.root.store(root, Ordering::SeqCst);
    }
}

impl Privileges for FakePrivileges {
    fn is_root(&self) -> bool {
        self.root.load(Ordering::SeqCst)
    }
}

/// A [`Host`] wired to fakes, keeping typed handles for assertions
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub ports: Arc<FakePorts>,
    pub routes: Arc<FakeRoutes>,
    pub packet_filter: Arc<FakePacketFilter>,
    pub services: Arc<FakeServices>,
    pub packages: Arc<FakePackages>,
    pub downloader: Arc<FakeDownloader>,
    pub privileges: Arc<FakePrivileges>,
}

impl FakeHost {
    /// Routed via `eth0` with the given ports already listening
    pub fn new(listening: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: Arc::new(FakePorts::new(listening)),
            routes: Arc::new(FakeRoutes::new("eth0")),
            packet_filter: Arc::new(FakePacketFilter::new()),
            services: Arc::new(FakeServices::new()),
            packages: Arc::new(FakePackages::new()),
            downloader: Arc::new(FakeDownloader::new(b"\x7fELF".to_vec())),
            privileges: Arc::new(FakePrivileges::new(true)),
        }
    }

    pub fn host(&self) -> Host {
        Host {
            ports: self.ports.clone(),
            routes: self.routes.clone(),
            packet_filter: self.packet_filter.clone(),
            services: self.services.clone(),
            packages: self.packages.clone(),
            downloader: self.downloader.clone(),
            privileges: self.privileges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_ports_counts_queries() {
        let ports = FakePorts::new([22, 80]);
        assert_eq!(ports.queries(), 0);
        ports.bind(443);
        let snapshot = ports.listening_ports().unwrap();
        assert_eq!(snapshot.into_iter().collect::<Vec<_>>(), vec![22, 80, 443]);
        assert_eq!(ports.queries(), 1);
    }

    #[test]
    fn test_fake_packet_filter_records_calls() {
        let filter = FakePacketFilter::new();
        filter.fail_reload(true);
        assert!(filter.reload().is_err());
        assert!(filter.restart().is_ok());
        assert_eq!(filter.calls(), vec![FilterCall::Reload, FilterCall::Restart]);
    }

    #[test]
    fn test_fake_routes() {
        let routes = FakeRoutes::new("ens3");
        assert_eq!(routes.default_interface().unwrap(), "ens3");
        routes.set(None);
        assert!(routes.default_interface().is_err());
    }

    #[test]
    fn test_fake_privileges() {
        let fake = FakeHost::new([]);
        let host = fake.host();
        assert!(host.privileges.is_root());
        fake.privileges.set_root(false);
        assert!(!host.privileges.is_root());
    }

    #[test]
    fn test_fake_downloader_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chimera");
        let downloader = FakeDownloader::new(b"binary".to_vec());
        downloader.download("https://example.com/chimera", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary");
        assert_eq!(downloader.downloads().len(), 1);
    }
}
