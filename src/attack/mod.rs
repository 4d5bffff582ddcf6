use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::catalog::{catalog, Tactic};
use crate::error::{AcesError, Result};
use crate::network::HostRole;

/// Strategy for selecting attack targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    HighestCriticality,
    LeastDefended,
    MostConnected,
    RandomReachable,
    SpecificRole(HostRole),
}

/// A single step in an attack chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackGene {
    pub technique_id: String,
    pub target_selector: TargetSelector,
    pub stealth_modifier: f64,
    #[serde(default)]
    pub fallback_technique: Option<String>,
}

/// Variable-length ordered sequence of genes forming a kill chain.
///
/// Invariants, enforced at construction:
/// - genes is non-empty and genes[0] is an initial-access technique
/// - len(genes) <= max_length
/// - every technique id (fallbacks included) exists in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GenomeParts")]
pub struct AttackGenome {
    genes: Vec<AttackGene>,
    max_length: usize,
}

#[derive(Deserialize)]
struct GenomeParts {
    genes: Vec<AttackGene>,
    max_length: usize,
}

impl TryFrom<GenomeParts> for AttackGenome {
    type Error = AcesError;

    fn try_from(parts: GenomeParts) -> Result<Self> {
        AttackGenome::new(parts.genes, parts.max_length)
    }
}

impl AttackGenome {
    pub fn new(genes: Vec<AttackGene>, max_length: usize) -> Result<Self> {
        let cat = catalog();
        if genes.is_empty() {
            return Err(AcesError::InvalidGenome("attack chain is empty".into()));
        }
        if genes.len() > max_length {
            return Err(AcesError::InvalidGenome(format!(
                "chain length {} exceeds max {max_length}",
                genes.len()
            )));
        }
        for gene in &genes {
            if !cat.contains(&gene.technique_id) {
                return Err(AcesError::InvalidGenome(format!(
                    "unknown technique {}",
                    gene.technique_id
                )));
            }
            if let Some(fb) = &gene.fallback_technique {
                if !cat.contains(fb) {
                    return Err(AcesError::InvalidGenome(format!("unknown fallback {fb}")));
                }
            }
        }
        let first = cat.get(&genes[0].technique_id).unwrap();
        if first.tactic != Tactic::InitialAccess {
            return Err(AcesError::InvalidGenome(format!(
                "chain must open with initial access, got {}",
                genes[0].technique_id
            )));
        }
        Ok(Self { genes, max_length })
    }

    /// Random valid genome: length in [1, max_length], gene 0 drawn from
    /// the initial-access subset, remaining genes uniform over the catalog.
    pub fn random<R: Rng>(rng: &mut R, max_length: usize) -> Self {
        let cat = catalog();
        let length = rng.gen_range(1..=max_length);

        let ia = cat.initial_access();
        let first = ia[rng.gen_range(0..ia.len())];
        let mut genes = vec![random_gene(rng, first.id)];

        for _ in 1..length {
            let spec = &cat.all()[rng.gen_range(0..cat.len())];
            genes.push(random_gene(rng, spec.id));
        }

        Self { genes, max_length }
    }

    pub fn genes(&self) -> &[AttackGene] {
        &self.genes
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// The kill chain as an ordered technique-id tuple.
    pub fn chain(&self) -> Vec<&str> {
        self.genes.iter().map(|g| g.technique_id.as_str()).collect()
    }
}

fn random_gene<R: Rng>(rng: &mut R, technique_id: &str) -> AttackGene {
    let cat = catalog();
    let fallback = if rng.gen_bool(0.2) {
        cat.get(technique_id).map(|spec| {
            let peers = cat.by_tactic(spec.tactic);
            peers[rng.gen_range(0..peers.len())].id.to_string()
        })
    } else {
        None
    };
    AttackGene {
        technique_id: technique_id.to_string(),
        target_selector: random_selector(rng),
        stealth_modifier: rng.gen_range(0.0..=1.0),
        fallback_technique: fallback,
    }
}

fn random_selector<R: Rng>(rng: &mut R) -> TargetSelector {
    match rng.gen_range(0..5) {
        0 => TargetSelector::HighestCriticality,
        1 => TargetSelector::LeastDefended,
        2 => TargetSelector::MostConnected,
        3 => TargetSelector::RandomReachable,
        _ => {
            let role = *HostRole::ALL.choose(rng).unwrap();
            TargetSelector::SpecificRole(role)
        }
    }
}

/// Single-point crossover. Each child inherits one parent's prefix and
/// the other's suffix, truncated to max length; gene 0 always comes from
/// the prefix parent.
pub fn crossover_attack<R: Rng>(
    a: &AttackGenome,
    b: &AttackGenome,
    rng: &mut R,
) -> Result<(AttackGenome, AttackGenome)> {
    let child1 = one_point_child(a, b, rng)?;
    let child2 = one_point_child(b, a, rng)?;
    Ok((child1, child2))
}

fn one_point_child<R: Rng>(
    first: &AttackGenome,
    second: &AttackGenome,
    rng: &mut R,
) -> Result<AttackGenome> {
    let min_len = first.len().min(second.len());
    let point = rng.gen_range(1..=min_len);
    let mut genes: Vec<AttackGene> = first.genes[..point].to_vec();
    genes.extend(second.genes.iter().skip(point).cloned());
    genes.truncate(first.max_length);
    AttackGenome::new(genes, first.max_length)
}

/// Apply one uniformly chosen mutation; variants whose guard would break
/// an invariant fall through to a stealth perturbation.
pub fn mutate_attack<R: Rng>(genome: &AttackGenome, rng: &mut R) -> Result<AttackGenome> {
    let cat = catalog();
    let mut genes = genome.genes.clone();

    match rng.gen_range(0..6) {
        // Append a random gene.
        0 if genes.len() < genome.max_length => {
            let spec = &cat.all()[rng.gen_range(0..cat.len())];
            genes.push(random_gene(rng, spec.id));
        }
        // Remove a non-zero gene.
        1 if genes.len() >= 2 => {
            let idx = rng.gen_range(1..genes.len());
            genes.remove(idx);
        }
        // Swap two non-zero gene positions.
        2 if genes.len() >= 3 => {
            let i = rng.gen_range(1..genes.len());
            let j = rng.gen_range(1..genes.len());
            genes.swap(i, j);
        }
        // Replace a gene's technique with another from the same tactic.
        3 => {
            let idx = rng.gen_range(0..genes.len());
            let tactic = cat.get(&genes[idx].technique_id).unwrap().tactic;
            let peers = cat.by_tactic(tactic);
            genes[idx].technique_id = peers[rng.gen_range(0..peers.len())].id.to_string();
        }
        // Re-roll a target selector.
        4 => {
            let idx = rng.gen_range(0..genes.len());
            genes[idx].target_selector = random_selector(rng);
        }
        // Perturb stealth by N(0, 0.1), clamped.
        _ => {
            let idx = rng.gen_range(0..genes.len());
            let normal = Normal::new(0.0, 0.1).expect("valid stddev");
            let delta: f64 = normal.sample(rng);
            genes[idx].stealth_modifier = (genes[idx].stealth_modifier + delta).clamp(0.0, 1.0);
        }
    }

    AttackGenome::new(genes, genome.max_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_random_genome_is_valid() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            let genome = AttackGenome::random(&mut rng, 12);
            assert!(!genome.is_empty());
            assert!(genome.len() <= 12);
            let first = catalog().get(&genome.genes()[0].technique_id).unwrap();
            assert_eq!(first.tactic, Tactic::InitialAccess);
        }
    }

    #[test]
    fn test_rejects_non_initial_access_opening() {
        let gene = AttackGene {
            technique_id: "T1486".into(),
            target_selector: TargetSelector::RandomReachable,
            stealth_modifier: 0.0,
            fallback_technique: None,
        };
        assert!(AttackGenome::new(vec![gene], 4).is_err());
    }

    #[test]
    fn test_rejects_unknown_technique() {
        let gene = AttackGene {
            technique_id: "T0000".into(),
            target_selector: TargetSelector::RandomReachable,
            stealth_modifier: 0.0,
            fallback_technique: None,
        };
        assert!(AttackGenome::new(vec![gene], 4).is_err());
    }

    #[test]
    fn test_crossover_preserves_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let a = AttackGenome::random(&mut rng, 8);
            let b = AttackGenome::random(&mut rng, 8);
            let (c1, c2) = crossover_attack(&a, &b, &mut rng).unwrap();
            for child in [&c1, &c2] {
                assert!(child.len() <= 8);
                let first = catalog().get(&child.genes()[0].technique_id).unwrap();
                assert_eq!(first.tactic, Tactic::InitialAccess);
            }
            assert_eq!(c1.genes()[0].technique_id, a.genes()[0].technique_id);
            assert_eq!(c2.genes()[0].technique_id, b.genes()[0].technique_id);
        }
    }

    #[test]
    fn test_mutation_preserves_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let mut genome = AttackGenome::random(&mut rng, 10);
        for _ in 0..500 {
            genome = mutate_attack(&genome, &mut rng).unwrap();
            assert!(!genome.is_empty());
            assert!(genome.len() <= 10);
            let first = catalog().get(&genome.genes()[0].technique_id).unwrap();
            assert_eq!(first.tactic, Tactic::InitialAccess);
            for gene in genome.genes() {
                assert!((0.0..=1.0).contains(&gene.stealth_modifier));
            }
        }
    }

    #[test]
    fn test_json_round_trip_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for _ in 0..20 {
            let genome = AttackGenome::random(&mut rng, 12);
            let json = serde_json::to_string(&genome).unwrap();
            let back: AttackGenome = serde_json::from_str(&json).unwrap();
            assert_eq!(back, genome);
        }
    }

    #[test]
    fn test_deserialization_rejects_invalid_chain() {
        let json = r#"{"genes":[{"technique_id":"T1486","target_selector":"random_reachable","stealth_modifier":0.1,"fallback_technique":null}],"max_length":4}"#;
        assert!(serde_json::from_str::<AttackGenome>(json).is_err());
    }

    #[test]
    fn test_single_gene_chain_is_constructible() {
        let gene = AttackGene {
            technique_id: "T1190".into(),
            target_selector: TargetSelector::HighestCriticality,
            stealth_modifier: 0.0,
            fallback_technique: None,
        };
        let genome = AttackGenome::new(vec![gene], 1).unwrap();
        assert_eq!(genome.len(), 1);
    }
}
