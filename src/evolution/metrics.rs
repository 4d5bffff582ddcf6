use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::attack::AttackGenome;
use crate::catalog::catalog;
use crate::defense::DefenseGenome;
use crate::scoring::FitnessVec;

/// (min, mean, max, stdev) summary of one fitness objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveStats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub std: f64,
}

impl ObjectiveStats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let arr = Array1::from_vec(values.to_vec());
        let mean = arr.mean().unwrap_or(0.0);
        let std = if values.len() > 1 { arr.std(0.0) } else { 0.0 };
        Self {
            min: arr.fold(f64::INFINITY, |a, &b| a.min(b)),
            mean,
            max: arr.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            std,
        }
    }
}

/// Metrics emitted at the end of every generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub generation: usize,
    pub attacker_effectiveness: ObjectiveStats,
    pub attacker_stealth: ObjectiveStats,
    pub defender_coverage: ObjectiveStats,
    pub defender_efficiency: ObjectiveStats,
    /// Relative frequency of each technique over all attacker genes.
    pub technique_frequencies: BTreeMap<String, f64>,
    /// Distinct ordered technique-id chains in the attacker population.
    pub unique_kill_chains: usize,
    /// Mean pairwise Hamming distance between technique-presence vectors,
    /// normalized to [0, 1].
    pub attacker_diversity: f64,
    /// Rule count per data source across the defender population.
    pub data_source_coverage: BTreeMap<String, usize>,
    pub hof_top_attacker: Option<FitnessVec>,
    pub hof_top_defender: Option<FitnessVec>,
}

/// Collects per-generation metrics and detects stagnation.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetricsCollector {
    pub history: Vec<GenerationMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_generation(
        &mut self,
        generation: usize,
        attackers: &[AttackGenome],
        attacker_fitness: &[FitnessVec],
        defenders: &[DefenseGenome],
        defender_fitness: &[FitnessVec],
        hof_top_attacker: Option<FitnessVec>,
        hof_top_defender: Option<FitnessVec>,
    ) -> &GenerationMetrics {
        let eff: Vec<f64> = attacker_fitness.iter().map(|f| f[0]).collect();
        let stealth: Vec<f64> = attacker_fitness.iter().map(|f| f[1]).collect();
        let cov: Vec<f64> = defender_fitness.iter().map(|f| f[0]).collect();
        let den_eff: Vec<f64> = defender_fitness.iter().map(|f| f[1]).collect();

        let mut technique_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_genes = 0usize;
        let mut chains: BTreeSet<Vec<&str>> = BTreeSet::new();
        for genome in attackers {
            for gene in genome.genes() {
                *technique_counts.entry(gene.technique_id.clone()).or_insert(0) += 1;
                total_genes += 1;
            }
            chains.insert(genome.chain());
        }
        let technique_frequencies = technique_counts
            .into_iter()
            .map(|(id, count)| (id, count as f64 / total_genes.max(1) as f64))
            .collect();

        let mut data_source_coverage: BTreeMap<String, usize> = BTreeMap::new();
        for genome in defenders {
            for rule in genome.genes() {
                *data_source_coverage.entry(rule.data_source.clone()).or_insert(0) += 1;
            }
        }

        let metrics = GenerationMetrics {
            generation,
            attacker_effectiveness: ObjectiveStats::from_values(&eff),
            attacker_stealth: ObjectiveStats::from_values(&stealth),
            defender_coverage: ObjectiveStats::from_values(&cov),
            defender_efficiency: ObjectiveStats::from_values(&den_eff),
            technique_frequencies,
            unique_kill_chains: chains.len(),
            attacker_diversity: hamming_diversity(attackers),
            data_source_coverage,
            hof_top_attacker,
            hof_top_defender,
        };

        self.history.push(metrics);
        self.history.last().unwrap()
    }

    /// True when no objective's population max has moved by at least
    /// `epsilon` across the last `window` generations.
    pub fn detect_stagnation(&self, window: usize, epsilon: f64) -> bool {
        if self.history.len() < window {
            return false;
        }
        let recent = &self.history[self.history.len() - window..];
        let series: [Vec<f64>; 4] = [
            recent.iter().map(|m| m.attacker_effectiveness.max).collect(),
            recent.iter().map(|m| m.attacker_stealth.max).collect(),
            recent.iter().map(|m| m.defender_coverage.max).collect(),
            recent.iter().map(|m| m.defender_efficiency.max).collect(),
        ];
        series.iter().all(|values| {
            let lo = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
            let hi = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            hi - lo < epsilon
        })
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.history)
    }
}

/// Mean pairwise Hamming distance between fixed-length technique
/// presence vectors, normalized by catalog size.
fn hamming_diversity(attackers: &[AttackGenome]) -> f64 {
    let n = attackers.len();
    if n < 2 {
        return 0.0;
    }
    let width = catalog().len();
    let mut presence = Array2::<f64>::zeros((n, width));
    for (row, genome) in attackers.iter().enumerate() {
        for gene in genome.genes() {
            if let Some(col) = catalog().ordinal(&gene.technique_id) {
                presence[[row, col]] = 1.0;
            }
        }
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in i + 1..n {
            let diff = (&presence.row(i) - &presence.row(j)).mapv(f64::abs).sum();
            total += diff / width as f64;
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Fan-out bus for generation metrics. Bounded per subscriber: a slow
/// consumer loses the oldest records, never stalls the loop.
pub struct MetricsBus {
    capacity: usize,
    subscribers: Vec<Arc<Mutex<VecDeque<GenerationMetrics>>>>,
}

impl MetricsBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> MetricsSubscriber {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity)));
        self.subscribers.push(Arc::clone(&queue));
        MetricsSubscriber { queue }
    }

    pub fn publish(&self, metrics: &GenerationMetrics) {
        for subscriber in &self.subscribers {
            let mut queue = subscriber.lock().expect("metrics queue poisoned");
            if queue.len() >= self.capacity {
                queue.pop_front();
            }
            queue.push_back(metrics.clone());
        }
    }
}

/// Receiving side of the metrics stream.
pub struct MetricsSubscriber {
    queue: Arc<Mutex<VecDeque<GenerationMetrics>>>,
}

impl MetricsSubscriber {
    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<GenerationMetrics> {
        let mut queue = self.queue.lock().expect("metrics queue poisoned");
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("metrics queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gen_metrics(generation: usize, eff_max: f64) -> GenerationMetrics {
        GenerationMetrics {
            generation,
            attacker_effectiveness: ObjectiveStats {
                min: 0.0,
                mean: eff_max / 2.0,
                max: eff_max,
                std: 1.0,
            },
            ..GenerationMetrics::default()
        }
    }

    #[test]
    fn test_objective_stats() {
        let stats = ObjectiveStats::from_values(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.mean - 2.5).abs() < 1e-9);
        assert!(stats.std > 0.0);
    }

    #[test]
    fn test_stagnation_detection_window() {
        let mut collector = MetricsCollector::new();
        for g in 0..10 {
            collector.history.push(gen_metrics(g, 5.0));
        }
        assert!(!collector.detect_stagnation(20, 0.5));
        for g in 10..20 {
            collector.history.push(gen_metrics(g, 5.0));
        }
        assert!(collector.detect_stagnation(20, 0.5));
    }

    #[test]
    fn test_improvement_resets_stagnation() {
        let mut collector = MetricsCollector::new();
        for g in 0..19 {
            collector.history.push(gen_metrics(g, 5.0));
        }
        collector.history.push(gen_metrics(19, 50.0));
        assert!(!collector.detect_stagnation(20, 0.5));
    }

    #[test]
    fn test_diversity_of_identical_population_is_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let genome = AttackGenome::random(&mut rng, 6);
        let pop = vec![genome.clone(), genome.clone(), genome];
        assert_eq!(hamming_diversity(&pop), 0.0);
    }

    #[test]
    fn test_diversity_positive_for_distinct_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let pop: Vec<AttackGenome> = (0..10).map(|_| AttackGenome::random(&mut rng, 8)).collect();
        assert!(hamming_diversity(&pop) > 0.0);
    }

    #[test]
    fn test_bus_drops_oldest_on_slow_consumer() {
        let mut bus = MetricsBus::new(3);
        let subscriber = bus.subscribe();
        for g in 0..5 {
            bus.publish(&gen_metrics(g, 1.0));
        }
        let drained = subscriber.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].generation, 2);
        assert_eq!(drained[2].generation, 4);
        assert!(subscriber.is_empty());
    }

    #[test]
    fn test_record_generation_counts_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(14);
        let attackers: Vec<AttackGenome> =
            (0..6).map(|_| AttackGenome::random(&mut rng, 6)).collect();
        let defenders: Vec<DefenseGenome> =
            (0..6).map(|_| DefenseGenome::random(&mut rng, 15)).collect();
        let fitness = vec![[1.0, 0.5]; 6];

        let mut collector = MetricsCollector::new();
        let m = collector.record_generation(
            0, &attackers, &fitness, &defenders, &fitness, None, None,
        );
        assert!(m.unique_kill_chains >= 1);
        assert!(!m.technique_frequencies.is_empty());
        let total: f64 = m.technique_frequencies.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
