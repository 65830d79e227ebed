//! Chimera Port Forwarding
//!
//! Turns the operator's declared forwarding rules into kernel NAT.
//!
//! ## Components
//!
//! - **RuleStore**: JSON file of rules keyed by name
//! - **PortValidator**: parses port specifications and checks them against
//!   the live socket table
//! - **NatSynthesizer**: renders the whole nftables NAT table from the store
//!   and asks the backend to load it
//! - **ForwardManager**: validate, persist, then resynthesize, for every add
//!   and remove
//!
//! The NAT table is always a pure function of the store. Nothing is diffed:
//! each mutation rewrites the full rule file.
//!
//! The live port snapshot is not held against other processes. A port found
//! free can be bound by someone else before the NAT rules land.

mod manager;
mod store;
mod synth;
mod validator;

pub use manager::{ForwardManager, Mutation, RuleRequest};
pub use store::RuleStore;
pub use synth::{render_ruleset, ApplyOutcome, FileAction, NatSynthesizer, SyncReport};
pub use validator::{ensure_no_store_overlap, PortValidator};

use chimera_core::CoreError;
use chimera_system::SystemError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Ports already in use: {}", join_ports(.0))]
    PortConflict(Vec<u16>),

    #[error("Cannot determine public interface: {0}")]
    InterfaceResolution(SystemError),

    #[error("Cannot make packet-filter config include rules: {0}")]
    ConfigRepair(String),

    #[error("Failed to apply NAT rules: {0}")]
    BackendApply(String),

    #[error("Failed to query listening ports: {0}")]
    PortQuery(SystemError),

    #[error("Rule already exists: {0}")]
    RuleExists(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<CoreError> for ForwardError {
    fn from(err: CoreError) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForwardError>;

/// Comma-joined ports for display
pub fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_port_conflict() {
        let err = ForwardError::PortConflict(vec![8001, 8002]);
        assert_eq!(err.to_string(), "Ports already in use: 8001, 8002");
    }

    #[test]
    fn test_error_from_core() {
        let err: ForwardError = CoreError::InvalidPortSpec("'x': not an integer".to_string()).into();
        assert!(matches!(err, ForwardError::InvalidFormat(_)));
    }

    #[test]
    fn test_error_display_rule_not_found() {
        let err = ForwardError::RuleNotFound("rule_9000".to_string());
        assert_eq!(err.to_string(), "Rule not found: rule_9000");
    }
}
