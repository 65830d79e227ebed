//! Forwarding rules
//!
//! A rule maps a set of public ports on the relay to the local port the tunnel
//! listener binds. The destination host/port is what the relay binary forwards
//! to; it is recorded here for the operator but never programmed into NAT.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{parse_port, CoreError, PortSpec, Result};

/// Rules keyed by name. Ordered so anything rendered from it is stable.
pub type RuleSet = BTreeMap<String, ForwardingRule>;

/// Derive the store key for a rule listening on `local_port`
pub fn rule_name(local_port: u16) -> String {
    format!("rule_{}", local_port)
}

/// A declared port forward
///
/// Every field is persisted as a string so the store file reads the same as the
/// values the operator typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// Ports exposed on the public interface
    pub public_ports: PortSpec,

    /// Port the tunnel listener binds on the relay
    #[serde(with = "port_string")]
    pub local_port: u16,

    /// Final destination address
    pub dest_ip: IpAddr,

    /// Final destination port
    #[serde(with = "port_string")]
    pub dest_port: u16,
}

impl ForwardingRule {
    /// Create a rule from already-validated parts
    pub fn new(public_ports: PortSpec, local_port: u16, dest_ip: IpAddr, dest_port: u16) -> Self {
        Self {
            public_ports,
            local_port,
            dest_ip,
            dest_port,
        }
    }

    /// Build a rule from operator input.
    ///
    /// The public ports must already be validated; the remaining fields are
    /// parsed here.
    pub fn from_input(
        public_ports: PortSpec,
        local_port: &str,
        dest_ip: &str,
        dest_port: &str,
    ) -> Result<Self> {
        let local_port = parse_port(local_port)?;
        let dest_port = parse_port(dest_port)?;
        let dest_ip = dest_ip
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidAddress(dest_ip.trim().to_string()))?;
        Ok(Self::new(public_ports, local_port, dest_ip, dest_port))
    }

    /// Store key of this rule
    pub fn name(&self) -> String {
        rule_name(self.local_port)
    }
}

mod port_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&port.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let text = String::deserialize(deserializer)?;
        crate::parse_port(&text).map_err(de::Error::custom)
    }
}
