//! Tunnel configuration documents
//!
//! The relay binary is started as `chimera -config <path>` and reads one of
//! these JSON documents. A document with `listen_address` runs the relay side,
//! one with `connect_address` runs the client side.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Handshake used to agree the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeMethod {
    /// Direct key exchange over the tunnel socket
    #[default]
    Static,
    /// Key exchange brokered through a Google Pub/Sub topic
    Google,
}

/// Which side of the tunnel a document configures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelRole {
    Relay,
    Client,
}

/// Config file consumed by the relay binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TunnelConfig {
    /// Handshake method
    #[serde(default)]
    pub handshake_method: HandshakeMethod,

    /// Address the relay listens on (relay side)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,

    /// Relay address to dial (client side)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_address: Option<String>,

    /// Google Cloud project (google handshake only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Pub/Sub topic (google handshake only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

impl TunnelConfig {
    /// Relay-side document listening on all interfaces
    pub fn relay(listen_port: u16) -> Self {
        Self {
            listen_address: Some(format!("0.0.0.0:{}", listen_port)),
            ..Default::default()
        }
    }

    /// Client-side document dialing `host:port`
    pub fn client(host: &str, port: u16) -> Self {
        Self {
            connect_address: Some(format_host_port(host, port)),
            ..Default::default()
        }
    }

    /// Switch to the google handshake
    pub fn with_google(mut self, project_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        self.handshake_method = HandshakeMethod::Google;
        self.project_id = Some(project_id.into());
        self.topic_id = Some(topic_id.into());
        self
    }

    /// Which side this document configures.
    ///
    /// `listen_address` wins when both are present, matching the relay binary.
    pub fn role(&self) -> Option<TunnelRole> {
        if self.listen_address.is_some() {
            Some(TunnelRole::Relay)
        } else if self.connect_address.is_some() {
            Some(TunnelRole::Client)
        } else {
            None
        }
    }

    /// Check the document is usable by the relay binary
    pub fn validate(&self) -> Result<()> {
        if self.role().is_none() {
            return Err(CoreError::InvalidAddress(
                "either listen_address or connect_address is required".to_string(),
            ));
        }
        if self.handshake_method == HandshakeMethod::Google
            && (self.project_id.is_none() || self.topic_id.is_none())
        {
            return Err(CoreError::InvalidAddress(
                "google handshake requires project_id and topic_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Pretty JSON, as written to disk
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn format_host_port(host: &str, port: u16) -> String {
    let host = host.trim();
    // Bare IPv6 literals need brackets to carry a port.
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
