use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::catalog::catalog;
use crate::error::{AcesError, Result};

/// Types of detection logic a defender can deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLogic {
    Signature,
    Behavioral,
    Correlation,
    MlAnomaly,
}

impl DetectionLogic {
    pub const ALL: [DetectionLogic; 4] = [
        DetectionLogic::Signature,
        DetectionLogic::Behavioral,
        DetectionLogic::Correlation,
        DetectionLogic::MlAnomaly,
    ];

    /// Deployment cost charged against the defender budget.
    pub fn deploy_cost(self) -> u32 {
        match self {
            DetectionLogic::Signature => 1,
            DetectionLogic::Behavioral => 2,
            DetectionLogic::Correlation => 3,
            DetectionLogic::MlAnomaly => 3,
        }
    }

    fn base_fp_rate(self) -> f64 {
        match self {
            DetectionLogic::Signature => 0.05,
            DetectionLogic::Behavioral => 0.15,
            DetectionLogic::Correlation => 0.08,
            DetectionLogic::MlAnomaly => 0.12,
        }
    }
}

/// Active response taken when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    AlertOnly,
    IsolateHost,
    KillProcess,
    RevokeCredential,
    BlockTraffic,
}

impl ResponseAction {
    pub const ALL: [ResponseAction; 5] = [
        ResponseAction::AlertOnly,
        ResponseAction::IsolateHost,
        ResponseAction::KillProcess,
        ResponseAction::RevokeCredential,
        ResponseAction::BlockTraffic,
    ];

    /// Whether the response aborts the detected technique.
    pub fn is_preventive(self) -> bool {
        !matches!(self, ResponseAction::AlertOnly)
    }
}

/// Default false-positive rate for a (data source, logic) pairing.
/// High-volume sources run hotter than audit-grade ones.
pub fn default_fp_rate(data_source: &str, logic: DetectionLogic) -> f64 {
    let noisy = matches!(
        data_source,
        "Network Traffic" | "Process Creation" | "Command Line"
    );
    let base = logic.base_fp_rate();
    if noisy {
        (base * 1.5).min(1.0)
    } else {
        base
    }
}

/// A single detection rule in a defender's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionGene {
    pub technique_detected: String,
    pub data_source: String,
    pub detection_logic: DetectionLogic,
    pub confidence: f64,
    pub fp_rate: f64,
    pub response_action: ResponseAction,
    pub deploy_cost: u32,
}

impl DetectionGene {
    fn dedup_key(&self) -> (&str, &str, DetectionLogic) {
        (
            self.technique_detected.as_str(),
            self.data_source.as_str(),
            self.detection_logic,
        )
    }
}

/// Unordered set of detection rules, bounded by deployment budget.
///
/// Invariants, enforced at construction:
/// - sum of deploy costs <= budget
/// - no two rules share (technique, data source, logic)
/// - every detected technique exists in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DefenseParts")]
pub struct DefenseGenome {
    genes: Vec<DetectionGene>,
    budget: u32,
}

#[derive(Deserialize)]
struct DefenseParts {
    genes: Vec<DetectionGene>,
    budget: u32,
}

impl TryFrom<DefenseParts> for DefenseGenome {
    type Error = AcesError;

    fn try_from(parts: DefenseParts) -> Result<Self> {
        DefenseGenome::new(parts.genes, parts.budget)
    }
}

impl DefenseGenome {
    pub fn new(genes: Vec<DetectionGene>, budget: u32) -> Result<Self> {
        let cat = catalog();
        let mut cost = 0u32;
        for (i, gene) in genes.iter().enumerate() {
            if !cat.contains(&gene.technique_detected) {
                return Err(AcesError::InvalidGenome(format!(
                    "unknown technique {}",
                    gene.technique_detected
                )));
            }
            if !(0.0..=1.0).contains(&gene.confidence) || !(0.0..=1.0).contains(&gene.fp_rate) {
                return Err(AcesError::InvalidGenome(format!(
                    "rule {i} confidence/fp_rate out of [0, 1]"
                )));
            }
            for other in &genes[..i] {
                if other.dedup_key() == gene.dedup_key() {
                    return Err(AcesError::InvalidGenome(format!(
                        "duplicate rule for {} via {} ({:?})",
                        gene.technique_detected, gene.data_source, gene.detection_logic
                    )));
                }
            }
            cost += gene.deploy_cost;
        }
        if cost > budget {
            return Err(AcesError::InvalidGenome(format!(
                "deploy cost {cost} exceeds budget {budget}"
            )));
        }
        Ok(Self { genes, budget })
    }

    /// An empty rule set is valid: zero coverage, full efficiency.
    pub fn empty(budget: u32) -> Self {
        Self { genes: Vec::new(), budget }
    }

    /// Random valid genome: rules are drawn until the next one would
    /// exceed the budget.
    pub fn random<R: Rng>(rng: &mut R, budget: u32) -> Self {
        let cat = catalog();
        let mut genes: Vec<DetectionGene> = Vec::new();
        let mut cost = 0u32;

        for _ in 0..(budget as usize * 4) {
            let spec = &cat.all()[rng.gen_range(0..cat.len())];
            let logic = DetectionLogic::ALL[rng.gen_range(0..DetectionLogic::ALL.len())];
            let data_source = spec.data_sources[rng.gen_range(0..spec.data_sources.len())];
            let gene = DetectionGene {
                technique_detected: spec.id.to_string(),
                data_source: data_source.to_string(),
                detection_logic: logic,
                confidence: rng.gen_range(0.3..=0.9),
                fp_rate: default_fp_rate(data_source, logic),
                response_action: ResponseAction::ALL[rng.gen_range(0..ResponseAction::ALL.len())],
                deploy_cost: logic.deploy_cost(),
            };
            if genes.iter().any(|g| g.dedup_key() == gene.dedup_key()) {
                continue;
            }
            if cost + gene.deploy_cost > budget {
                break;
            }
            cost += gene.deploy_cost;
            genes.push(gene);
        }

        Self { genes, budget }
    }

    pub fn genes(&self) -> &[DetectionGene] {
        &self.genes
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn total_deploy_cost(&self) -> u32 {
        self.genes.iter().map(|g| g.deploy_cost).sum()
    }

    /// Total false positive rate across deployed rules.
    pub fn total_fp_load(&self) -> f64 {
        self.genes.iter().map(|g| g.fp_rate).sum()
    }

    pub fn covers_technique(&self, technique_id: &str) -> bool {
        self.genes.iter().any(|g| g.technique_detected == technique_id)
    }

    /// Rules targeting a technique, with their positions as rule ids.
    pub fn rules_for(&self, technique_id: &str) -> Vec<(usize, &DetectionGene)> {
        self.genes
            .iter()
            .enumerate()
            .filter(|(_, g)| g.technique_detected == technique_id)
            .collect()
    }
}

/// Uniform crossover: pool both parents' rules, sample each into each
/// child with p = 0.5, deduplicate, then greedily drop the lowest
/// utility (confidence / cost) rules until the budget holds.
pub fn crossover_defense<R: Rng>(
    a: &DefenseGenome,
    b: &DefenseGenome,
    rng: &mut R,
) -> Result<(DefenseGenome, DefenseGenome)> {
    let pool: Vec<&DetectionGene> = a.genes.iter().chain(b.genes.iter()).collect();

    let mut make_child = |budget: u32, rng: &mut R| -> Result<DefenseGenome> {
        let mut genes: Vec<DetectionGene> = Vec::new();
        for gene in &pool {
            if rng.gen_bool(0.5) && !genes.iter().any(|g| g.dedup_key() == gene.dedup_key()) {
                genes.push((*gene).clone());
            }
        }
        trim_to_budget(&mut genes, budget);
        DefenseGenome::new(genes, budget)
    };

    let child1 = make_child(a.budget, rng)?;
    let child2 = make_child(b.budget, rng)?;
    Ok((child1, child2))
}

fn trim_to_budget(genes: &mut Vec<DetectionGene>, budget: u32) {
    while genes.iter().map(|g| g.deploy_cost).sum::<u32>() > budget {
        let worst = genes
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| {
                let ux = x.confidence / x.deploy_cost as f64;
                let uy = y.confidence / y.deploy_cost as f64;
                ux.partial_cmp(&uy).expect("finite utilities")
            })
            .map(|(i, _)| i)
            .expect("non-empty while over budget");
        genes.remove(worst);
    }
}

/// Apply one uniformly chosen mutation; a variant whose guard would
/// break an invariant leaves the genome unchanged.
pub fn mutate_defense<R: Rng>(genome: &DefenseGenome, rng: &mut R) -> Result<DefenseGenome> {
    let cat = catalog();
    let mut genes = genome.genes.clone();
    let budget = genome.budget;

    let variant = rng.gen_range(0..6);
    match variant {
        // Add a random rule if the budget permits.
        0 => {
            let spec = &cat.all()[rng.gen_range(0..cat.len())];
            let logic = DetectionLogic::ALL[rng.gen_range(0..DetectionLogic::ALL.len())];
            let data_source = spec.data_sources[rng.gen_range(0..spec.data_sources.len())];
            let gene = DetectionGene {
                technique_detected: spec.id.to_string(),
                data_source: data_source.to_string(),
                detection_logic: logic,
                confidence: rng.gen_range(0.3..=0.9),
                fp_rate: default_fp_rate(data_source, logic),
                response_action: ResponseAction::ALL[rng.gen_range(0..ResponseAction::ALL.len())],
                deploy_cost: logic.deploy_cost(),
            };
            let total: u32 = genes.iter().map(|g| g.deploy_cost).sum();
            if total + gene.deploy_cost <= budget
                && !genes.iter().any(|g| g.dedup_key() == gene.dedup_key())
            {
                genes.push(gene);
            }
        }
        // Remove a random rule.
        1 if !genes.is_empty() => {
            let idx = rng.gen_range(0..genes.len());
            genes.remove(idx);
        }
        // Switch a rule's detection logic, recosting it.
        2 if !genes.is_empty() => {
            let idx = rng.gen_range(0..genes.len());
            let logic = DetectionLogic::ALL[rng.gen_range(0..DetectionLogic::ALL.len())];
            let mut candidate = genes[idx].clone();
            candidate.detection_logic = logic;
            candidate.deploy_cost = logic.deploy_cost();
            candidate.fp_rate = default_fp_rate(&candidate.data_source, logic);
            let others_cost: u32 = genes
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, g)| g.deploy_cost)
                .sum();
            let duplicate = genes
                .iter()
                .enumerate()
                .any(|(i, g)| i != idx && g.dedup_key() == candidate.dedup_key());
            if others_cost + candidate.deploy_cost <= budget && !duplicate {
                genes[idx] = candidate;
            }
        }
        // Tune confidence by N(0, 0.1), clamped.
        3 if !genes.is_empty() => {
            let idx = rng.gen_range(0..genes.len());
            let normal = Normal::new(0.0, 0.1).expect("valid stddev");
            let delta: f64 = normal.sample(rng);
            genes[idx].confidence = (genes[idx].confidence + delta).clamp(0.0, 1.0);
        }
        // Change response action.
        4 if !genes.is_empty() => {
            let idx = rng.gen_range(0..genes.len());
            genes[idx].response_action =
                ResponseAction::ALL[rng.gen_range(0..ResponseAction::ALL.len())];
        }
        // Retarget the rule at another technique.
        5 if !genes.is_empty() => {
            let idx = rng.gen_range(0..genes.len());
            let spec = &cat.all()[rng.gen_range(0..cat.len())];
            let data_source = spec.data_sources[rng.gen_range(0..spec.data_sources.len())];
            let mut candidate = genes[idx].clone();
            candidate.technique_detected = spec.id.to_string();
            candidate.data_source = data_source.to_string();
            candidate.fp_rate = default_fp_rate(data_source, candidate.detection_logic);
            let duplicate = genes
                .iter()
                .enumerate()
                .any(|(i, g)| i != idx && g.dedup_key() == candidate.dedup_key());
            if !duplicate {
                genes[idx] = candidate;
            }
        }
        _ => {}
    }

    DefenseGenome::new(genes, budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rule(technique: &str, source: &str, logic: DetectionLogic) -> DetectionGene {
        DetectionGene {
            technique_detected: technique.into(),
            data_source: source.into(),
            detection_logic: logic,
            confidence: 0.7,
            fp_rate: default_fp_rate(source, logic),
            response_action: ResponseAction::AlertOnly,
            deploy_cost: logic.deploy_cost(),
        }
    }

    #[test]
    fn test_random_genome_respects_budget() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for budget in [1u32, 5, 15, 30] {
            for _ in 0..50 {
                let genome = DefenseGenome::random(&mut rng, budget);
                assert!(genome.total_deploy_cost() <= budget);
            }
        }
    }

    #[test]
    fn test_budget_one_holds_single_signature_rule() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..100 {
            let genome = DefenseGenome::random(&mut rng, 1);
            assert!(genome.len() <= 1);
            if let Some(gene) = genome.genes().first() {
                assert_eq!(gene.deploy_cost, 1);
            }
        }
    }

    #[test]
    fn test_rejects_duplicate_triple() {
        let genes = vec![
            rule("T1190", "Network Traffic", DetectionLogic::Signature),
            rule("T1190", "Network Traffic", DetectionLogic::Signature),
        ];
        assert!(DefenseGenome::new(genes, 15).is_err());
    }

    #[test]
    fn test_same_technique_different_source_is_allowed() {
        let genes = vec![
            rule("T1190", "Network Traffic", DetectionLogic::Signature),
            rule("T1190", "Application Log", DetectionLogic::Signature),
        ];
        assert!(DefenseGenome::new(genes, 15).is_ok());
    }

    #[test]
    fn test_rejects_over_budget() {
        let genes = vec![
            rule("T1190", "Network Traffic", DetectionLogic::Correlation),
            rule("T1078", "Authentication Log", DetectionLogic::Correlation),
        ];
        assert!(DefenseGenome::new(genes, 5).is_err());
    }

    #[test]
    fn test_crossover_respects_budget_and_dedup() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        for _ in 0..100 {
            let a = DefenseGenome::random(&mut rng, 15);
            let b = DefenseGenome::random(&mut rng, 15);
            let (c1, c2) = crossover_defense(&a, &b, &mut rng).unwrap();
            assert!(c1.total_deploy_cost() <= 15);
            assert!(c2.total_deploy_cost() <= 15);
        }
    }

    #[test]
    fn test_mutation_preserves_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let mut genome = DefenseGenome::random(&mut rng, 10);
        for _ in 0..500 {
            genome = mutate_defense(&genome, &mut rng).unwrap();
            assert!(genome.total_deploy_cost() <= 10);
            for gene in genome.genes() {
                assert!((0.0..=1.0).contains(&gene.confidence));
                assert!((0.0..=1.0).contains(&gene.fp_rate));
            }
        }
    }

    #[test]
    fn test_empty_rule_set_is_valid() {
        let genome = DefenseGenome::empty(15);
        assert!(genome.is_empty());
        assert_eq!(genome.total_deploy_cost(), 0);
        assert_eq!(genome.total_fp_load(), 0.0);
    }

    #[test]
    fn test_json_round_trip_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        for _ in 0..20 {
            let genome = DefenseGenome::random(&mut rng, 15);
            let json = serde_json::to_string(&genome).unwrap();
            let back: DefenseGenome = serde_json::from_str(&json).unwrap();
            assert_eq!(back, genome);
        }
    }

    #[test]
    fn test_deserialization_rejects_over_budget() {
        let genome = DefenseGenome::new(
            vec![rule("T1190", "Network Traffic", DetectionLogic::Correlation)],
            15,
        )
        .unwrap();
        let json = serde_json::to_string(&genome).unwrap().replace("\"budget\":15", "\"budget\":1");
        assert!(serde_json::from_str::<DefenseGenome>(&json).is_err());
    }
}
