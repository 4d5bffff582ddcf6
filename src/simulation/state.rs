use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::defense::ResponseAction;
use crate::network::{NetworkGraph, PrivilegeLevel, ReachQuery, EXTERNAL_ID};

/// Possible outcomes for a single simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    PreconditionFailure,
    DetectedAndPrevented,
    DetectedButSucceeded,
    FailedRoll,
}

/// Record of a single simulation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub step_index: usize,
    pub technique_id: String,
    pub target_host_id: Option<String>,
    pub outcome: EventOutcome,
    pub detection_rule_id: Option<usize>,
    pub response_action: Option<ResponseAction>,
    pub effects_applied: Vec<String>,
}

/// Aggregates scoring feeds from one matchup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub compromised_host_ids: Vec<String>,
    pub credentials_harvested: usize,
    pub exfiltrated: bool,
    pub techniques_attempted: usize,
    pub techniques_detected: usize,
    pub techniques_succeeded: usize,
    pub techniques_prevented: usize,
    pub chain_length: usize,
    pub max_criticality: f64,
    pub criticality_sum: f64,
    pub persistence_established: bool,
}

/// Full result of one attacker-vs-defender matchup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub events: Vec<SimEvent>,
    pub summary: MatchSummary,
}

/// Mutable state for one matchup, wrapping a private network clone.
pub(crate) struct SimulationState {
    pub network: NetworkGraph,
    /// None means the attacker is still external.
    pub position: Option<String>,
    pub compromised: BTreeSet<String>,
    pub obtained_credentials: BTreeSet<String>,
    pub persistence_hosts: BTreeSet<String>,
    pub isolated: BTreeSet<String>,
    pub exfiltrated: bool,
    pub stealth_bonus: f64,
    pub detection_reduction: BTreeMap<String, f64>,
    pub events: Vec<SimEvent>,
}

impl SimulationState {
    pub fn new(network: &NetworkGraph) -> Self {
        Self {
            network: network.clone(),
            position: None,
            compromised: BTreeSet::new(),
            obtained_credentials: BTreeSet::new(),
            persistence_hosts: BTreeSet::new(),
            isolated: BTreeSet::new(),
            exfiltrated: false,
            stealth_bonus: 0.0,
            detection_reduction: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// All hosts reachable from the current position or any compromised,
    /// non-isolated host. Sorted, excludes the external sentinel and
    /// isolated hosts.
    pub fn reachable_pool(&self) -> Vec<String> {
        let query = ReachQuery {
            protocol: None,
            has_credential: self.has_any_credential(),
            min_privilege: PrivilegeLevel::None,
        };

        let mut pool: BTreeSet<String> = BTreeSet::new();
        match &self.position {
            None => pool.extend(self.network.reachable_from(EXTERNAL_ID, &query)),
            Some(here) => pool.extend(self.network.reachable_from(here, &query)),
        }
        for host in &self.compromised {
            if !self.isolated.contains(host) {
                pool.extend(self.network.reachable_from(host, &query));
            }
        }
        pool.retain(|h| h.as_str() != EXTERNAL_ID && !self.isolated.contains(h));
        pool.into_iter().collect()
    }

    /// Current privilege on a host; `None` level until compromised.
    pub fn attacker_privilege(&self, host_id: &str) -> PrivilegeLevel {
        if !self.compromised.contains(host_id) {
            return PrivilegeLevel::None;
        }
        self.network
            .host(host_id)
            .map(|h| h.privilege_level)
            .unwrap_or(PrivilegeLevel::None)
    }

    /// Whether an obtained, unrevoked credential is valid on a host.
    pub fn has_credential_for(&self, host_id: &str) -> bool {
        self.obtained_credentials
            .iter()
            .any(|id| match self.network.credential(id) {
                Some(c) => c.valid_on.contains(host_id),
                None => false,
            })
    }

    /// Best privilege among obtained credentials valid on a host.
    pub fn credential_privilege_for(&self, host_id: &str) -> Option<PrivilegeLevel> {
        self.obtained_credentials
            .iter()
            .filter_map(|id| self.network.credential(id))
            .filter(|c| c.valid_on.contains(host_id))
            .map(|c| c.privilege)
            .max()
    }

    pub fn has_any_credential(&self) -> bool {
        self.obtained_credentials
            .iter()
            .any(|id| self.network.credential(id).is_some())
    }

    pub fn record(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    /// Fold final state into the per-matchup summary.
    pub fn into_result(self, counters: StepCounters) -> MatchResult {
        let criticality_sum: f64 = self
            .compromised
            .iter()
            .filter_map(|id| self.network.host(id))
            .map(|h| h.criticality)
            .sum();
        let max_criticality = self
            .compromised
            .iter()
            .filter_map(|id| self.network.host(id))
            .map(|h| h.criticality)
            .fold(0.0f64, f64::max);

        MatchResult {
            summary: MatchSummary {
                compromised_host_ids: self.compromised.iter().cloned().collect(),
                credentials_harvested: self.obtained_credentials.len(),
                exfiltrated: self.exfiltrated,
                techniques_attempted: counters.attempted,
                techniques_detected: counters.detected,
                techniques_succeeded: counters.succeeded,
                techniques_prevented: counters.prevented,
                chain_length: counters.max_consecutive,
                max_criticality,
                criticality_sum,
                persistence_established: !self.persistence_hosts.is_empty(),
            },
            events: self.events,
        }
    }
}

/// Running tallies over a matchup's steps.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StepCounters {
    pub attempted: usize,
    pub detected: usize,
    pub succeeded: usize,
    pub prevented: usize,
    pub consecutive: usize,
    pub max_consecutive: usize,
}

impl StepCounters {
    pub fn success(&mut self) {
        self.succeeded += 1;
        self.consecutive += 1;
        self.max_consecutive = self.max_consecutive.max(self.consecutive);
    }

    pub fn break_chain(&mut self) {
        self.consecutive = 0;
    }
}
