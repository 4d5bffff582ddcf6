use crate::config::ScoringWeights;
use crate::defense::DefenseGenome;
use crate::simulation::MatchSummary;

/// Two-objective fitness vector, maximized componentwise under NSGA-II.
pub type FitnessVec = [f64; 2];

/// Attacker fitness over a batch of matchups: mean (effectiveness, stealth).
///
/// effectiveness = Σ criticality(compromised) · W_crit
///               + credentials · W_cred + exfil · W_exfil + chain · W_len
/// stealth       = 1 − detected / max(attempted, 1)
pub fn attacker_fitness(summaries: &[MatchSummary], weights: &ScoringWeights) -> FitnessVec {
    if summaries.is_empty() {
        return [0.0, 0.0];
    }

    let mut effectiveness = 0.0;
    let mut stealth = 0.0;
    for s in summaries {
        effectiveness += s.criticality_sum * weights.host_criticality_multiplier
            + s.credentials_harvested as f64 * weights.credential_value
            + if s.exfiltrated { weights.exfiltration_bonus } else { 0.0 }
            + s.chain_length as f64 * weights.kill_chain_length_value;

        let attempted = s.techniques_attempted.max(1) as f64;
        stealth += 1.0 - s.techniques_detected as f64 / attempted;
    }

    let n = summaries.len() as f64;
    [effectiveness / n, stealth / n]
}

/// Defender fitness over a batch of matchups: mean coverage paired with
/// a genome-level efficiency term.
///
/// coverage   = detected / max(attempted, 1) · W_det
///            + prevented · W_prev + [no exfil] · W_noexfil
/// efficiency = 1 / (1 + Σ fp_rate · W_fp) × (1 − cost / budget)
pub fn defender_fitness(
    summaries: &[MatchSummary],
    defender: &DefenseGenome,
    weights: &ScoringWeights,
) -> FitnessVec {
    let efficiency = defender_efficiency(defender, weights);
    if summaries.is_empty() {
        return [0.0, efficiency];
    }

    let mut coverage = 0.0;
    for s in summaries {
        let attempted = s.techniques_attempted.max(1) as f64;
        coverage += s.techniques_detected as f64 / attempted * weights.detection_value
            + s.techniques_prevented as f64 * weights.prevention_value
            + if s.exfiltrated { 0.0 } else { weights.no_exfil_bonus };
    }

    [coverage / summaries.len() as f64, efficiency]
}

fn defender_efficiency(defender: &DefenseGenome, weights: &ScoringWeights) -> f64 {
    let fp_load = defender.total_fp_load() * weights.false_positive_penalty;
    let cost_ratio = defender.total_deploy_cost() as f64 / defender.budget().max(1) as f64;
    (1.0 / (1.0 + fp_load)) * (1.0 - cost_ratio)
}
