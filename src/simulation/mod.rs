pub mod state;

use rand::Rng;

use crate::attack::{AttackGene, AttackGenome, TargetSelector};
use crate::catalog::{catalog, Effect, Precondition, TechniqueSpec};
use crate::defense::{DefenseGenome, DetectionGene};
use crate::network::{NetworkGraph, PrivilegeLevel};

pub use state::{EventOutcome, MatchResult, MatchSummary, SimEvent};
use state::{SimulationState, StepCounters};

/// Execute one attacker-vs-defender matchup on a private clone of the
/// network. Deterministic: the same (attacker, defender, rng state)
/// always produces an identical trace. Draws happen in a fixed order per
/// step: target selection, then detection, then the success roll.
pub fn simulate<R: Rng>(
    attacker: &AttackGenome,
    defender: &DefenseGenome,
    network: &NetworkGraph,
    rng: &mut R,
) -> MatchResult {
    let mut sim = SimulationState::new(network);
    let mut counters = StepCounters::default();

    for (step, gene) in attacker.genes().iter().enumerate() {
        let outcome = execute_gene(
            &mut sim,
            defender,
            gene,
            &gene.technique_id,
            step,
            rng,
            &mut counters,
        );

        // A resolution or precondition miss burns the fallback, once.
        if outcome == EventOutcome::PreconditionFailure {
            if let Some(fallback) = &gene.fallback_technique {
                execute_gene(&mut sim, defender, gene, fallback, step, rng, &mut counters);
            }
        }
    }

    sim.into_result(counters)
}

fn execute_gene<R: Rng>(
    sim: &mut SimulationState,
    defender: &DefenseGenome,
    gene: &AttackGene,
    technique_id: &str,
    step: usize,
    rng: &mut R,
    counters: &mut StepCounters,
) -> EventOutcome {
    counters.attempted += 1;
    let Some(tech) = catalog().get(technique_id) else {
        // Malformed opponent input scores as a failed step, never a panic.
        counters.break_chain();
        sim.record(SimEvent {
            step_index: step,
            technique_id: technique_id.to_string(),
            target_host_id: None,
            outcome: EventOutcome::PreconditionFailure,
            detection_rule_id: None,
            response_action: None,
            effects_applied: Vec::new(),
        });
        return EventOutcome::PreconditionFailure;
    };

    // 1. Target resolution.
    let target = resolve_target(sim, defender, gene, tech, rng);
    let Some(target) = target else {
        counters.break_chain();
        sim.record(SimEvent {
            step_index: step,
            technique_id: tech.id.to_string(),
            target_host_id: None,
            outcome: EventOutcome::PreconditionFailure,
            detection_rule_id: None,
            response_action: None,
            effects_applied: Vec::new(),
        });
        return EventOutcome::PreconditionFailure;
    };

    // 2. Preconditions against the candidate.
    if !preconditions_hold(sim, tech, &target) {
        counters.break_chain();
        sim.record(SimEvent {
            step_index: step,
            technique_id: tech.id.to_string(),
            target_host_id: Some(target),
            outcome: EventOutcome::PreconditionFailure,
            detection_rule_id: None,
            response_action: None,
            effects_applied: Vec::new(),
        });
        return EventOutcome::PreconditionFailure;
    }

    // 3. Detection roll across all applicable rules.
    let detection = roll_detection(sim, defender, gene, tech, &target, rng);

    if let Some((rule_id, rule)) = &detection {
        counters.detected += 1;
        if rule.response_action.is_preventive() {
            counters.prevented += 1;
            counters.break_chain();
            apply_response(sim, tech, rule, &target);
            sim.record(SimEvent {
                step_index: step,
                technique_id: tech.id.to_string(),
                target_host_id: Some(target),
                outcome: EventOutcome::DetectedAndPrevented,
                detection_rule_id: Some(*rule_id),
                response_action: Some(rule.response_action),
                effects_applied: Vec::new(),
            });
            return EventOutcome::DetectedAndPrevented;
        }
    }

    // 4. Success roll; detection shaves 30% off the success rate.
    let detected = detection.is_some();
    let success_p = tech.base_success * if detected { 0.7 } else { 1.0 };
    let roll: f64 = rng.gen();
    if roll >= success_p {
        counters.break_chain();
        let (rule_id, rule) = match &detection {
            Some((id, rule)) => (Some(*id), Some(rule.response_action)),
            None => (None, None),
        };
        sim.record(SimEvent {
            step_index: step,
            technique_id: tech.id.to_string(),
            target_host_id: Some(target),
            outcome: EventOutcome::FailedRoll,
            detection_rule_id: rule_id,
            response_action: rule,
            effects_applied: Vec::new(),
        });
        return EventOutcome::FailedRoll;
    }

    // 5. Effects.
    let effects_applied = apply_effects(sim, tech, &target);
    counters.success();
    let outcome = if detected {
        EventOutcome::DetectedButSucceeded
    } else {
        EventOutcome::Success
    };
    sim.record(SimEvent {
        step_index: step,
        technique_id: tech.id.to_string(),
        target_host_id: Some(target),
        outcome,
        detection_rule_id: detection.as_ref().map(|(id, _)| *id),
        response_action: detection.as_ref().map(|(_, r)| r.response_action),
        effects_applied,
    });
    outcome
}

fn is_foothold_technique(tech: &TechniqueSpec) -> bool {
    tech.effects
        .iter()
        .any(|e| matches!(e, Effect::Foothold { .. } | Effect::LateralMove))
}

fn is_on_host_technique(tech: &TechniqueSpec) -> bool {
    tech.preconditions.contains(&Precondition::PositionOnHost)
}

fn resolve_target<R: Rng>(
    sim: &SimulationState,
    defender: &DefenseGenome,
    gene: &AttackGene,
    tech: &TechniqueSpec,
    rng: &mut R,
) -> Option<String> {
    // External-only techniques are spent once the attacker is inside.
    if tech.preconditions.contains(&Precondition::PositionExternal) && sim.position.is_some() {
        return None;
    }

    let reachable = sim.reachable_pool();
    let candidates: Vec<String> = if is_foothold_technique(tech) {
        reachable
            .into_iter()
            .filter(|h| !sim.compromised.contains(h))
            .collect()
    } else if is_on_host_technique(tech) && !sim.compromised.is_empty() {
        sim.compromised
            .iter()
            .filter(|h| !sim.isolated.contains(*h))
            .cloned()
            .collect()
    } else {
        reachable
    };

    if candidates.is_empty() {
        return None;
    }

    // Candidates are sorted by id, so first-wins scans break ties to the
    // lowest host id.
    match gene.target_selector {
        TargetSelector::HighestCriticality => candidates
            .iter()
            .max_by(|a, b| {
                let ca = sim.network.host(a).map(|h| h.criticality).unwrap_or(0.0);
                let cb = sim.network.host(b).map(|h| h.criticality).unwrap_or(0.0);
                ca.partial_cmp(&cb).unwrap().then(b.cmp(a))
            })
            .cloned(),
        TargetSelector::LeastDefended => {
            // Detection rules are not host-scoped, so every candidate
            // carries the same applicable-rule count and the tie break
            // selects the lowest host id.
            let _ = applicable_rules(defender, tech);
            candidates.first().cloned()
        }
        TargetSelector::MostConnected => candidates
            .iter()
            .max_by(|a, b| {
                let da = sim.network.out_degree(a);
                let db = sim.network.out_degree(b);
                da.cmp(&db).then(b.cmp(a))
            })
            .cloned(),
        TargetSelector::RandomReachable => {
            Some(candidates[rng.gen_range(0..candidates.len())].clone())
        }
        TargetSelector::SpecificRole(role) => {
            let matching: Vec<&String> = candidates
                .iter()
                .filter(|h| sim.network.host(h).map(|x| x.role) == Some(role))
                .collect();
            if matching.is_empty() {
                None
            } else {
                Some(matching[rng.gen_range(0..matching.len())].clone())
            }
        }
    }
}

fn preconditions_hold(sim: &SimulationState, tech: &TechniqueSpec, target: &str) -> bool {
    let Some(host) = sim.network.host(target) else {
        return false;
    };

    tech.preconditions.iter().all(|p| match p {
        Precondition::PositionExternal => sim.position.is_none(),
        Precondition::PositionInternal => sim.position.is_some() || !sim.compromised.is_empty(),
        Precondition::PositionOnHost => sim.compromised.contains(target),
        Precondition::PrivilegeUser => sim.attacker_privilege(target) >= PrivilegeLevel::User,
        Precondition::PrivilegeAdmin => sim.attacker_privilege(target) >= PrivilegeLevel::Admin,
        Precondition::ServiceRunning(name) => host.has_service(name),
        Precondition::VulnerabilityExists => host.has_vulnerability_for(tech.id),
        Precondition::CredentialAvailable => sim.has_credential_for(target),
        Precondition::HostNotIsolated => !sim.isolated.contains(target),
        Precondition::OsWindows => host.is_windows(),
        Precondition::OsLinux => host.is_linux(),
        Precondition::HostIsDc => host.role == crate::network::HostRole::DomainController,
        Precondition::HasCredentialCache => host.has_credential_cache,
        Precondition::DataStaged => host.data_staged,
    })
}

/// Rules applicable to a technique: technique match plus a data source
/// the technique can actually be observed through.
fn applicable_rules<'a>(
    defender: &'a DefenseGenome,
    tech: &TechniqueSpec,
) -> Vec<(usize, &'a DetectionGene)> {
    defender
        .rules_for(tech.id)
        .into_iter()
        .filter(|(_, rule)| tech.has_data_source(&rule.data_source))
        .collect()
}

/// Probabilistic-OR detection over all applicable rules. Returns the
/// charged rule: ordered by (deploy_cost, rule id), the first whose
/// individual probability clears the draw; if only the combined mass
/// clears it, the strongest individual rule.
fn roll_detection<'a, R: Rng>(
    sim: &SimulationState,
    defender: &'a DefenseGenome,
    gene: &AttackGene,
    tech: &TechniqueSpec,
    target: &str,
    rng: &mut R,
) -> Option<(usize, &'a DetectionGene)> {
    let mut rules = applicable_rules(defender, tech);
    if rules.is_empty() {
        return None;
    }
    rules.sort_by_key(|(id, rule)| (rule.deploy_cost, *id));

    let stealth = (gene.stealth_modifier + sim.stealth_bonus).min(1.0);
    let reduction = sim.detection_reduction.get(target).copied().unwrap_or(0.0);
    let probs: Vec<f64> = rules
        .iter()
        .map(|(_, rule)| {
            let p = rule.confidence * (1.0 - stealth * (1.0 - tech.stealth_base));
            (p - reduction).clamp(0.0, 1.0)
        })
        .collect();

    let combined = 1.0 - probs.iter().map(|p| 1.0 - p).product::<f64>();
    let draw: f64 = rng.gen();
    if draw >= combined {
        return None;
    }

    for ((id, rule), p) in rules.iter().zip(&probs) {
        if draw < *p {
            return Some((*id, *rule));
        }
    }
    // The OR fired on combined mass alone; charge the strongest rule.
    rules
        .iter()
        .zip(&probs)
        .max_by(|(_, pa), (_, pb)| pa.partial_cmp(pb).unwrap())
        .map(|((id, rule), _)| (*id, *rule))
}

fn apply_response(
    sim: &mut SimulationState,
    tech: &TechniqueSpec,
    rule: &DetectionGene,
    target: &str,
) {
    use crate::defense::ResponseAction;

    match rule.response_action {
        ResponseAction::IsolateHost => {
            sim.isolated.insert(target.to_string());
            sim.network.isolate(target);
        }
        ResponseAction::RevokeCredential => {
            // Burn exactly the credentials this prevented step would have
            // harvested from the target's cache.
            let harvests = tech
                .effects
                .iter()
                .any(|e| matches!(e, Effect::CredentialHarvest));
            let has_cache = sim
                .network
                .host(target)
                .map(|h| h.has_credential_cache)
                .unwrap_or(false);
            if harvests && has_cache {
                for cred_id in sim.network.credentials_for_host(target) {
                    sim.network.revoke(&cred_id);
                    sim.obtained_credentials.remove(&cred_id);
                }
            }
        }
        ResponseAction::KillProcess | ResponseAction::BlockTraffic => {}
        ResponseAction::AlertOnly => {}
    }
}

fn apply_effects(sim: &mut SimulationState, tech: &TechniqueSpec, target: &str) -> Vec<String> {
    let mut applied = Vec::new();

    for effect in &tech.effects {
        match effect {
            Effect::Foothold { privilege } => {
                let mut level = privilege.unwrap_or(PrivilegeLevel::User);
                if tech.preconditions.contains(&Precondition::CredentialAvailable) {
                    if let Some(cred_priv) = sim.credential_privilege_for(target) {
                        level = level.max(cred_priv);
                    }
                }
                sim.network.compromise(target, level);
                sim.compromised.insert(target.to_string());
                sim.position = Some(target.to_string());
                applied.push(format!("foothold:{target}"));
            }
            Effect::PrivEscalation { to } => {
                sim.network.compromise(target, *to);
                applied.push(format!("privilege:{to:?}"));
            }
            Effect::CredentialHarvest => {
                let harvested = sim.network.harvest_credentials(target);
                let count = harvested.len();
                sim.obtained_credentials.extend(harvested);
                applied.push(format!("credentials:{count}"));
            }
            Effect::Persistence => {
                sim.persistence_hosts.insert(target.to_string());
                applied.push(format!("persistence:{target}"));
            }
            Effect::LateralMove => {
                let level = sim
                    .credential_privilege_for(target)
                    .unwrap_or(PrivilegeLevel::User)
                    .max(PrivilegeLevel::User);
                sim.network.compromise(target, level);
                sim.compromised.insert(target.to_string());
                sim.position = Some(target.to_string());
                applied.push(format!("moved_to:{target}"));
            }
            Effect::Exfil => {
                let has_valuable_foothold = sim
                    .compromised
                    .iter()
                    .filter_map(|id| sim.network.host(id))
                    .any(|h| h.criticality >= 0.4);
                if has_valuable_foothold {
                    sim.exfiltrated = true;
                    applied.push("exfiltrated".to_string());
                }
            }
            Effect::Impact => {
                applied.push(format!("impact:{target}"));
            }
            Effect::ExecuteCommand => {
                applied.push("command_executed".to_string());
            }
            Effect::DiscoverHosts => {
                let segment = sim
                    .network
                    .host(target)
                    .map(|h| h.segment.clone())
                    .unwrap_or_default();
                let found = sim
                    .network
                    .segments()
                    .get(&segment)
                    .map(|members| members.len())
                    .unwrap_or(0);
                applied.push(format!("discovered:{found}"));
            }
            Effect::ReduceDetection(value) => {
                *sim.detection_reduction.entry(target.to_string()).or_insert(0.0) += value;
                applied.push(format!("detection_reduced:{value}"));
            }
            Effect::IncreaseStealth(value) => {
                sim.stealth_bonus += value;
                applied.push(format!("stealth_bonus:{value}"));
            }
            Effect::StageData => {
                if let Some(host) = sim.network.host_mut(target) {
                    host.data_staged = true;
                }
                applied.push(format!("data_staged:{target}"));
            }
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::{AttackGene, TargetSelector};
    use crate::defense::{DetectionGene, DetectionLogic, ResponseAction};
    use crate::network::topology::TopologyBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn lone_exploit() -> AttackGenome {
        AttackGenome::new(
            vec![AttackGene {
                technique_id: "T1190".into(),
                target_selector: TargetSelector::HighestCriticality,
                stealth_modifier: 0.0,
                fallback_technique: None,
            }],
            4,
        )
        .unwrap()
    }

    fn signature_rule(technique: &str, source: &str, response: ResponseAction) -> DetectionGene {
        DetectionGene {
            technique_detected: technique.into(),
            data_source: source.into(),
            detection_logic: DetectionLogic::Signature,
            confidence: 1.0,
            fp_rate: 0.0,
            response_action: response,
            deploy_cost: 1,
        }
    }

    #[test]
    fn test_trace_is_deterministic() {
        let network = TopologyBuilder::corporate_medium();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let attacker = AttackGenome::random(&mut rng, 8);
        let defender = DefenseGenome::random(&mut rng, 15);

        let a = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(99));
        let b = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(99));
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_simulation_never_mutates_input_network() {
        let network = TopologyBuilder::corporate_medium();
        let before = crate::network::topology::TopologySpec::from_graph(&network)
            .to_json_string()
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        for _ in 0..10 {
            let attacker = AttackGenome::random(&mut rng, 12);
            let defender = DefenseGenome::random(&mut rng, 15);
            simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(1));
        }
        let after = crate::network::topology::TopologySpec::from_graph(&network)
            .to_json_string()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_lone_exploit_against_empty_defender() {
        let network = TopologyBuilder::corporate_medium();
        let attacker = lone_exploit();
        let defender = DefenseGenome::empty(15);

        // T1190 needs a vulnerable, externally reachable host: dmz-web-01.
        // Across seeds the outcome is success or a failed roll, never a
        // detection.
        let mut seen_success = false;
        for seed in 0..20 {
            let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(seed));
            assert_eq!(result.summary.techniques_attempted, 1);
            assert_eq!(result.summary.techniques_detected, 0);
            assert!(!result.summary.exfiltrated);
            match result.events[0].outcome {
                EventOutcome::Success => {
                    seen_success = true;
                    assert_eq!(
                        result.summary.compromised_host_ids,
                        vec!["dmz-web-01".to_string()]
                    );
                    assert_eq!(result.summary.chain_length, 1);
                }
                EventOutcome::FailedRoll => {
                    assert!(result.summary.compromised_host_ids.is_empty());
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!(seen_success, "0.7 success rate should land within 20 seeds");
    }

    #[test]
    fn test_full_detection_prevents_everything() {
        let network = TopologyBuilder::corporate_medium();
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        // Zero stealth so confidence 1.0 guarantees the detection roll.
        let attacker = {
            let sampled = AttackGenome::random(&mut rng, 6);
            let genes = sampled
                .genes()
                .iter()
                .map(|g| AttackGene {
                    stealth_modifier: 0.0,
                    ..g.clone()
                })
                .collect();
            AttackGenome::new(genes, 6).unwrap()
        };

        // A perfect-confidence isolate rule per technique in the chain,
        // each on a data source the technique emits.
        let mut genes = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for gene in attacker.genes() {
            let tech = catalog().get(&gene.technique_id).unwrap();
            if seen.insert(tech.id) {
                genes.push(signature_rule(
                    tech.id,
                    tech.data_sources[0],
                    ResponseAction::IsolateHost,
                ));
            }
            if let Some(fb) = &gene.fallback_technique {
                let tech = catalog().get(fb).unwrap();
                if seen.insert(tech.id) {
                    genes.push(signature_rule(
                        tech.id,
                        tech.data_sources[0],
                        ResponseAction::IsolateHost,
                    ));
                }
            }
        }
        let budget = genes.len() as u32;
        let defender = DefenseGenome::new(genes, budget).unwrap();

        let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(3));
        // Nothing gets through: every step either misses its
        // preconditions or is detected and prevented.
        for event in &result.events {
            assert!(
                matches!(
                    event.outcome,
                    EventOutcome::PreconditionFailure | EventOutcome::DetectedAndPrevented
                ),
                "event {event:?}"
            );
        }
        assert_eq!(result.summary.techniques_detected, result.summary.techniques_prevented);
        assert_eq!(result.summary.techniques_succeeded, 0);
        assert!(!result.summary.exfiltrated);
    }

    #[test]
    fn test_alert_only_detection_lets_technique_through() {
        let network = TopologyBuilder::corporate_medium();
        let attacker = lone_exploit();
        let defender = DefenseGenome::new(
            vec![signature_rule("T1190", "Network Traffic", ResponseAction::AlertOnly)],
            15,
        )
        .unwrap();

        let mut saw_detected_success = false;
        for seed in 0..40 {
            let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(seed));
            let event = &result.events[0];
            assert!(event.detection_rule_id.is_some(), "confidence 1.0 always fires");
            if event.outcome == EventOutcome::DetectedButSucceeded {
                saw_detected_success = true;
                assert_eq!(result.summary.techniques_prevented, 0);
            }
        }
        assert!(saw_detected_success);
    }

    #[test]
    fn test_isolation_blocks_later_lateral_movement() {
        let network = TopologyBuilder::corporate_medium();
        let genes = vec![
            AttackGene {
                technique_id: "T1190".into(),
                target_selector: TargetSelector::HighestCriticality,
                stealth_modifier: 0.0,
                fallback_technique: None,
            },
            AttackGene {
                technique_id: "T1005".into(),
                target_selector: TargetSelector::RandomReachable,
                stealth_modifier: 0.0,
                fallback_technique: None,
            },
        ];
        let attacker = AttackGenome::new(genes, 4).unwrap();
        let defender = DefenseGenome::new(
            vec![signature_rule("T1190", "Network Traffic", ResponseAction::IsolateHost)],
            15,
        )
        .unwrap();

        let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(result.events[0].outcome, EventOutcome::DetectedAndPrevented);
        // With the beachhead isolated the attacker never lands inside.
        assert!(result.summary.compromised_host_ids.is_empty());
    }

    #[test]
    fn test_fallback_runs_once_at_same_step() {
        let network = TopologyBuilder::corporate_medium();
        // T1078 needs a credential the attacker does not have; fallback
        // T1190 can still fire from outside.
        let genes = vec![AttackGene {
            technique_id: "T1078".into(),
            target_selector: TargetSelector::HighestCriticality,
            stealth_modifier: 0.0,
            fallback_technique: Some("T1190".into()),
        }];
        let attacker = AttackGenome::new(genes, 4).unwrap();
        let defender = DefenseGenome::empty(15);

        let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(2));
        assert_eq!(result.summary.techniques_attempted, 2);
        assert_eq!(result.events[0].outcome, EventOutcome::PreconditionFailure);
        assert_eq!(result.events[0].step_index, 0);
        assert_eq!(result.events[1].step_index, 0);
        assert_eq!(result.events[1].technique_id, "T1190");
    }

    #[test]
    fn test_exfil_requires_valuable_compromise() {
        let network = TopologyBuilder::corporate_medium();
        // Compromise only the web server (criticality 0.3), stage, exfil:
        // the exfiltration flag must stay down.
        let genes = vec![
            AttackGene {
                technique_id: "T1190".into(),
                target_selector: TargetSelector::HighestCriticality,
                stealth_modifier: 0.0,
                fallback_technique: None,
            },
            AttackGene {
                technique_id: "T1083".into(),
                target_selector: TargetSelector::RandomReachable,
                stealth_modifier: 0.0,
                fallback_technique: None,
            },
            AttackGene {
                technique_id: "T1041".into(),
                target_selector: TargetSelector::RandomReachable,
                stealth_modifier: 0.0,
                fallback_technique: None,
            },
        ];
        let attacker = AttackGenome::new(genes, 4).unwrap();
        let defender = DefenseGenome::empty(15);

        for seed in 0..30 {
            let result = simulate(&attacker, &defender, &network, &mut ChaCha8Rng::seed_from_u64(seed));
            assert!(!result.summary.exfiltrated, "seed {seed}");
        }
    }
}
