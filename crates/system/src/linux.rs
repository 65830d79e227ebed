//! Linux implementations backed by standard command-line tools

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use crate::command::run;
use crate::{
    Downloader, InterfaceResolver, PackageInstaller, PacketFilterBackend, PortQuerier, Privileges,
    Result, ServiceController, SystemError,
};

/// Privilege check against the process's effective uid
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveUid;

impl Privileges for EffectiveUid {
    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
}

/// Listening sockets via `ss -tuln`
#[derive(Debug, Clone, Copy, Default)]
pub struct SsPortQuerier;

impl PortQuerier for SsPortQuerier {
    fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        let output = run("ss", &["-tuln"])?;
        let ports = parse_ss_ports(&output);
        debug!("{} listening ports", ports.len());
        Ok(ports)
    }
}

/// Extract local ports from `ss -tuln` output.
///
/// Columns are `Netid State Recv-Q Send-Q Local:Port Peer:Port`. The header
/// line and wildcard ports are skipped.
pub fn parse_ss_ports(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .filter_map(|local| local.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| *port != 0)
        .collect()
}

/// Default route via `ip route show default`
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRouteResolver;

impl InterfaceResolver for IpRouteResolver {
    fn default_interface(&self) -> Result<String> {
        let output = run("ip", &["route", "show", "default"])?;
        parse_default_interface(&output)
    }
}

/// Pick the `dev` of the first default route
pub fn parse_default_interface(output: &str) -> Result<String> {
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("default") {
            continue;
        }
        while let Some(field) = fields.next() {
            if field == "dev" {
                return fields
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| SystemError::Parse(format!("route without device: {}", line)));
            }
        }
    }
    Err(SystemError::NoDefaultRoute)
}

/// nftables managed through its systemd unit
#[derive(Debug, Clone)]
pub struct NftablesService {
    service: String,
}

impl NftablesService {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl PacketFilterBackend for NftablesService {
    fn reload(&self) -> Result<()> {
        run("systemctl", &["reload", &self.service]).map(|_| ())
    }

    fn restart(&self) -> Result<()> {
        run("systemctl", &["restart", &self.service]).map(|_| ())
    }
}

/// systemd via `systemctl`
#[derive(Debug, Clone, Copy, Default)]
pub struct Systemctl;

impl ServiceController for Systemctl {
    fn daemon_reload(&self) -> Result<()> {
        run("systemctl", &["daemon-reload"]).map(|_| ())
    }

    fn enable_now(&self, unit: &str) -> Result<()> {
        run("systemctl", &["enable", "--now", unit]).map(|_| ())
    }

    fn disable_now(&self, unit: &str) -> Result<()> {
        run("systemctl", &["disable", "--now", unit]).map(|_| ())
    }
}

/// Debian/Ubuntu packages via `apt-get`
#[derive(Debug, Clone, Copy, Default)]
pub struct AptInstaller;

impl PackageInstaller for AptInstaller {
    fn install(&self, packages: &[String]) -> Result<()> {
        info!("Installing packages: {}", packages.join(", "));
        run("apt-get", &["update"])?;
        let mut args = vec!["install", "-y"];
        args.extend(packages.iter().map(String::as_str));
        run("apt-get", &args).map(|_| ())
    }
}

/// Downloads via `curl -fL`
#[derive(Debug, Clone, Copy, Default)]
pub struct CurlDownloader;

impl Downloader for CurlDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let dest = dest
            .to_str()
            .ok_or_else(|| SystemError::Parse(format!("non-UTF-8 path {:?}", dest)))?;
        info!("Downloading {}", url);
        run("curl", &["-fsSL", "-o", dest, url]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SS_OUTPUT: &str = "\
Netid State  Recv-Q Send-Q      Local Address:Port  Peer Address:Port Process
udp   UNCONN 0      0           127.0.0.53%lo:53         0.0.0.0:*
udp   UNCONN 0      0                 0.0.0.0:8001       0.0.0.0:*
tcp   LISTEN 0      4096        127.0.0.53%lo:53         0.0.0.0:*
tcp   LISTEN 0      128               0.0.0.0:22         0.0.0.0:*
tcp   LISTEN 0      128                  [::]:22            [::]:*
tcp   LISTEN 0      511                     *:8080             *:*
";

    #[test]
    fn test_parse_ss_ports() {
        let ports: Vec<u16> = parse_ss_ports(SS_OUTPUT).into_iter().collect();
        assert_eq!(ports, vec![22, 53, 8001, 8080]);
    }

    #[test]
    fn test_parse_ss_ports_empty() {
        assert!(parse_ss_ports("").is_empty());
        assert!(parse_ss_ports("Netid State Recv-Q Send-Q Local Address:Port Peer Address:Port").is_empty());
    }

    #[test]
    fn test_parse_default_interface() {
        let output = "default via 10.0.0.1 dev eth0 proto dhcp src 10.0.0.5 metric 100\n";
        assert_eq!(parse_default_interface(output).unwrap(), "eth0");
    }

    #[test]
    fn test_parse_default_interface_first_wins() {
        let output = "\
default via 192.168.1.1 dev ens3 proto static
default via 10.8.0.1 dev wg0 metric 600
";
        assert_eq!(parse_default_interface(output).unwrap(), "ens3");
    }

    #[test]
    fn test_parse_default_interface_missing() {
        assert!(matches!(
            parse_default_interface(""),
            Err(SystemError::NoDefaultRoute)
        ));
        assert!(matches!(
            parse_default_interface("10.0.0.0/24 dev eth0 proto kernel scope link\n"),
            Err(SystemError::NoDefaultRoute)
        ));
        assert!(matches!(
            parse_default_interface("default via 10.0.0.1 dev"),
            Err(SystemError::Parse(_))
        ));
    }
}
