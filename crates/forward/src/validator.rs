//! Port specification validation

use std::sync::Arc;

use chimera_core::{PortSpec, RuleSet};
use chimera_system::PortQuerier;
use tracing::debug;

use crate::{ForwardError, Result};

/// Certifies that requested public ports are free right now
pub struct PortValidator {
    ports: Arc<dyn PortQuerier>,
}

impl PortValidator {
    pub fn new(ports: Arc<dyn PortQuerier>) -> Self {
        Self { ports }
    }

    /// Parse `spec` and check it against the live socket table.
    ///
    /// The returned spec keeps the text exactly as supplied. Malformed input
    /// fails before any system query.
    pub fn validate(&self, spec: &str) -> Result<PortSpec> {
        let parsed = PortSpec::parse(spec)?;
        self.ensure_free(&parsed)?;
        Ok(parsed)
    }

    /// Fail with every requested port that is currently listening, ascending
    pub fn ensure_free(&self, spec: &PortSpec) -> Result<()> {
        let requested = spec.expand();
        let listening = self
            .ports
            .listening_ports()
            .map_err(ForwardError::PortQuery)?;

        let conflicts: Vec<u16> = requested.intersection(&listening).copied().collect();
        if conflicts.is_empty() {
            debug!("Ports {} are free", spec);
            Ok(())
        } else {
            Err(ForwardError::PortConflict(conflicts))
        }
    }
}

/// Fail when `spec` claims a public port already owned by a stored rule
pub fn ensure_no_store_overlap(spec: &PortSpec, rules: &RuleSet) -> Result<()> {
    let requested = spec.expand();
    let mut conflicts: Vec<u16> = rules
        .values()
        .flat_map(|rule| rule.public_ports.expand())
        .filter(|port| requested.contains(port))
        .collect();
    conflicts.sort_unstable();
    conflicts.dedup();

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(ForwardError::PortConflict(conflicts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::ForwardingRule;
    use chimera_system::fake::FakePorts;

    fn validator(listening: &[u16]) -> (PortValidator, Arc<FakePorts>) {
        let ports = Arc::new(FakePorts::new(listening.iter().copied()));
        (PortValidator::new(ports.clone()), ports)
    }

    #[test]
    fn test_validate_returns_spec_unchanged() {
        let (validator, _) = validator(&[22, 80]);
        let spec = validator.validate("8000-8002, 9000").unwrap();
        assert_eq!(spec.as_str(), "8000-8002, 9000");
    }

    #[test]
    fn test_validate_reports_single_conflict_in_range() {
        let (validator, _) = validator(&[8001]);
        let err = validator.validate("8000-8002").unwrap_err();
        match err {
            ForwardError::PortConflict(ports) => assert_eq!(ports, vec![8001]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_reports_every_conflict_sorted() {
        let (validator, _) = validator(&[8002, 8000, 8001, 22]);
        let err = validator.validate("8002,8000-8002,9000").unwrap_err();
        match err {
            ForwardError::PortConflict(ports) => assert_eq!(ports, vec![8000, 8001, 8002]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_input_never_queries() {
        let (validator, ports) = validator(&[]);
        for bad in ["", "abc", "80-", "9000-8000", "0", "70000", "80,,81"] {
            let err = validator.validate(bad).unwrap_err();
            assert!(matches!(err, ForwardError::InvalidFormat(_)), "{bad}: {err:?}");
        }
        assert_eq!(ports.queries(), 0);
    }

    #[test]
    fn test_store_overlap() {
        let mut rules = RuleSet::new();
        let existing = ForwardingRule::new(
            PortSpec::parse("8000-8005").unwrap(),
            9000,
            "127.0.0.1".parse().unwrap(),
            9000,
        );
        rules.insert(existing.name(), existing);

        let overlapping = PortSpec::parse("8005-8010,8003").unwrap();
        match ensure_no_store_overlap(&overlapping, &rules) {
            Err(ForwardError::PortConflict(ports)) => assert_eq!(ports, vec![8003, 8005]),
            other => panic!("unexpected result: {:?}", other),
        }

        let disjoint = PortSpec::parse("8006-8010").unwrap();
        assert!(ensure_no_store_overlap(&disjoint, &rules).is_ok());
    }
}
