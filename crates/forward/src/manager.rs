//! Forwarding rule lifecycle
//!
//! Every mutation runs validate -> persist -> synthesize before returning.
//! A synthesis failure never rolls back the store: the rule stays persisted
//! and the failure is handed back in [`Mutation::sync`] so the operator can
//! retry with [`ForwardManager::resync`].

use chimera_core::{ForwardingRule, PortSpec, RuleSet};
use chimera_settings::ManagerSettings;
use chimera_system::Host;
use tracing::{info, warn};

use crate::store::RuleStore;
use crate::synth::{NatSynthesizer, SyncReport};
use crate::validator::{ensure_no_store_overlap, PortValidator};
use crate::{ForwardError, Result};

/// Operator input for a new rule, as typed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleRequest {
    pub public_ports: String,
    pub local_port: String,
    pub dest_ip: String,
    pub dest_port: String,
}

/// Outcome of a persisted mutation
#[derive(Debug)]
pub struct Mutation {
    /// Name of the rule added or removed
    pub name: String,
    /// Rules in the store after the mutation
    pub rule_count: usize,
    /// NAT reconciliation result
    pub sync: Result<SyncReport>,
}

impl Mutation {
    /// Whether the live NAT table picked up the change
    pub fn is_applied(&self) -> bool {
        self.sync.is_ok()
    }
}

/// Validates, persists and applies forwarding rules
pub struct ForwardManager {
    store: RuleStore,
    validator: PortValidator,
    synth: NatSynthesizer,
}

impl ForwardManager {
    pub fn new(settings: &ManagerSettings, host: &Host) -> Self {
        Self {
            store: RuleStore::new(settings.paths.rule_store.clone()),
            validator: PortValidator::new(host.ports.clone()),
            synth: NatSynthesizer::new(settings, host.routes.clone(), host.packet_filter.clone()),
        }
    }

    /// Every stored rule, by name
    pub fn rules(&self) -> RuleSet {
        self.store.load()
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn synthesizer(&self) -> &NatSynthesizer {
        &self.synth
    }

    /// Accept a new rule.
    ///
    /// Rejected without touching the store when the input is malformed, the
    /// name is taken, or a public port overlaps a stored rule or a live
    /// listener. Malformed input is rejected before the socket table is read.
    pub fn add(&self, request: &RuleRequest) -> Result<Mutation> {
        let public_ports = PortSpec::parse(&request.public_ports)?;
        let rule = ForwardingRule::from_input(
            public_ports,
            &request.local_port,
            &request.dest_ip,
            &request.dest_port,
        )?;
        let name = rule.name();

        let mut rules = self.store.load();
        if rules.contains_key(&name) {
            return Err(ForwardError::RuleExists(name));
        }
        ensure_no_store_overlap(&rule.public_ports, &rules)?;
        self.validator.ensure_free(&rule.public_ports)?;

        info!(
            "Adding {}: {} -> {}:{} via local port {}",
            name, rule.public_ports, rule.dest_ip, rule.dest_port, rule.local_port
        );
        rules.insert(name.clone(), rule);
        self.store.save(&rules)?;

        Ok(self.finish(name, &rules))
    }

    /// Remove a stored rule by name
    pub fn remove(&self, name: &str) -> Result<Mutation> {
        let mut rules = self.store.load();
        if rules.remove(name).is_none() {
            return Err(ForwardError::RuleNotFound(name.to_string()));
        }

        info!("Removing {}", name);
        self.store.save(&rules)?;

        Ok(self.finish(name.to_string(), &rules))
    }

    /// Re-apply the stored rules without changing them
    pub fn resync(&self) -> Result<SyncReport> {
        let rules = self.store.load();
        self.synth.synthesize(&rules)?.ensure_applied()
    }

    fn finish(&self, name: String, rules: &RuleSet) -> Mutation {
        let sync = self
            .synth
            .synthesize(rules)
            .and_then(SyncReport::ensure_applied);
        if let Err(e) = &sync {
            warn!("{} is saved but NAT rules were not applied: {}", name, e);
        }
        Mutation {
            name,
            rule_count: rules.len(),
            sync,
        }
    }
}
