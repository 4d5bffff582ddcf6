pub mod metrics;
pub mod nsga;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::attack::{crossover_attack, mutate_attack, AttackGenome};
use crate::config::Config;
use crate::defense::{crossover_defense, mutate_defense, DefenseGenome};
use crate::error::Result;
use crate::network::NetworkGraph;
use crate::scoring::{attacker_fitness, defender_fitness, FitnessVec};
use crate::simulation::{simulate, MatchSummary};

pub use metrics::{GenerationMetrics, MetricsBus, MetricsCollector, MetricsSubscriber};

/// Operator bundle owned by the loop. Nothing here is global; swapping a
/// field swaps the operator for the whole run.
pub struct Operators {
    pub attacker_init: Box<dyn Fn(&mut ChaCha8Rng, &Config) -> AttackGenome + Send + Sync>,
    pub attacker_crossover: Box<
        dyn Fn(&AttackGenome, &AttackGenome, &mut ChaCha8Rng) -> Result<(AttackGenome, AttackGenome)>
            + Send
            + Sync,
    >,
    pub attacker_mutate:
        Box<dyn Fn(&AttackGenome, &mut ChaCha8Rng) -> Result<AttackGenome> + Send + Sync>,
    pub defender_init: Box<dyn Fn(&mut ChaCha8Rng, &Config) -> DefenseGenome + Send + Sync>,
    pub defender_crossover: Box<
        dyn Fn(&DefenseGenome, &DefenseGenome, &mut ChaCha8Rng) -> Result<(DefenseGenome, DefenseGenome)>
            + Send
            + Sync,
    >,
    pub defender_mutate:
        Box<dyn Fn(&DefenseGenome, &mut ChaCha8Rng) -> Result<DefenseGenome> + Send + Sync>,
}

impl Operators {
    /// The standard operator suite from the attack and defense modules.
    pub fn standard() -> Self {
        Self {
            attacker_init: Box::new(|rng, config| {
                AttackGenome::random(rng, config.max_attack_chain_length)
            }),
            attacker_crossover: Box::new(|a, b, rng| crossover_attack(a, b, rng)),
            attacker_mutate: Box::new(|g, rng| mutate_attack(g, rng)),
            defender_init: Box::new(|rng, config| {
                DefenseGenome::random(rng, config.defender_budget)
            }),
            defender_crossover: Box::new(|a, b, rng| crossover_defense(a, b, rng)),
            defender_mutate: Box::new(|g, rng| mutate_defense(g, rng)),
        }
    }
}

/// Hall-of-fame entry for an attacker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HofAttacker {
    pub kill_chain: Vec<String>,
    pub fitness: FitnessVec,
    pub genome: AttackGenome,
}

/// Hall-of-fame entry for a defender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HofDefender {
    pub techniques: Vec<String>,
    pub fitness: FitnessVec,
    pub genome: DefenseGenome,
}

/// Complete results from a co-evolution run.
#[derive(Debug, Serialize)]
pub struct EvolutionResult {
    pub config: Config,
    pub history: Vec<GenerationMetrics>,
    pub attacker_hof: Vec<HofAttacker>,
    pub defender_hof: Vec<HofDefender>,
    pub final_attackers: Vec<AttackGenome>,
    pub final_defenders: Vec<DefenseGenome>,
    pub generations_completed: usize,
}

/// Orchestrates the arms race between the two populations.
pub struct CoevolutionEngine {
    config: Config,
    network: NetworkGraph,
    operators: Operators,
    rng: ChaCha8Rng,
    metrics: MetricsCollector,
    bus: MetricsBus,
    attacker_hof: Vec<HofAttacker>,
    defender_hof: Vec<HofDefender>,
    cancel: Arc<AtomicBool>,
}

const HOF_OPPONENT_OFFSET: u64 = 1 << 32;
const OPERATOR_RETRIES: usize = 3;

impl CoevolutionEngine {
    pub fn new(config: Config, network: NetworkGraph) -> Result<Self> {
        Self::with_operators(config, network, Operators::standard())
    }

    pub fn with_operators(
        config: Config,
        network: NetworkGraph,
        operators: Operators,
    ) -> Result<Self> {
        config.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            network,
            operators,
            rng,
            metrics: MetricsCollector::new(),
            bus: MetricsBus::new(256),
            attacker_hof: Vec::new(),
            defender_hof: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag that stops the loop at the next generation boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Best-effort metrics stream; slow consumers lose oldest records.
    pub fn subscribe_metrics(&mut self) -> MetricsSubscriber {
        self.bus.subscribe()
    }

    pub fn run(&mut self) -> Result<EvolutionResult> {
        let n = self.config.population_size;
        let mut attackers: Vec<AttackGenome> = (0..n)
            .map(|_| (self.operators.attacker_init)(&mut self.rng, &self.config))
            .collect();
        let mut defenders: Vec<DefenseGenome> = (0..n)
            .map(|_| (self.operators.defender_init)(&mut self.rng, &self.config))
            .collect();

        tracing::info!(
            population = n,
            generations = self.config.num_generations,
            seed = self.config.seed,
            "starting co-evolution"
        );

        let mut generations_completed = 0usize;
        let mut stagnation_muted_until = self.config.stagnation_window;

        for generation in 0..self.config.num_generations {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!(generation, "cancelled; finalizing completed generations");
                break;
            }

            // 1. Opponent sampling on the master stream, in index order.
            let attacker_opponents: Vec<Vec<Opponent>> = (0..attackers.len())
                .map(|_| {
                    sample_opponents(
                        &mut self.rng,
                        defenders.len(),
                        self.defender_hof.len(),
                        self.config.matchups_per_eval,
                        self.config.hof_opponent_fraction,
                    )
                })
                .collect();
            let defender_opponents: Vec<Vec<Opponent>> = (0..defenders.len())
                .map(|_| {
                    sample_opponents(
                        &mut self.rng,
                        attackers.len(),
                        self.attacker_hof.len(),
                        self.config.matchups_per_eval,
                        self.config.hof_opponent_fraction,
                    )
                })
                .collect();

            // 2. Parallel evaluation over deterministic substreams.
            let attacker_results = self.evaluate_attackers(
                generation as u64,
                &attackers,
                &defenders,
                &attacker_opponents,
            );
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!(generation, "cancelled between evaluation batches");
                break;
            }
            let defender_results = self.evaluate_defenders(
                generation as u64,
                &attackers,
                &defenders,
                &defender_opponents,
            );

            let attacker_fit: Vec<FitnessVec> = attacker_results
                .iter()
                .map(|summaries| attacker_fitness(summaries, &self.config.scoring))
                .collect();
            let defender_fit: Vec<FitnessVec> = defender_results
                .iter()
                .zip(&defenders)
                .map(|(summaries, genome)| {
                    defender_fitness(summaries, genome, &self.config.scoring)
                })
                .collect();

            // 3. Hall of fame.
            self.update_attacker_hof(&attackers, &attacker_fit);
            self.update_defender_hof(&defenders, &defender_fit);

            // 8. Metrics (recorded before breeding so subscribers see the
            // evaluated generation).
            let m = self.metrics.record_generation(
                generation,
                &attackers,
                &attacker_fit,
                &defenders,
                &defender_fit,
                hof_top(&self.attacker_hof, |e| e.fitness),
                hof_top(&self.defender_hof, |e| e.fitness),
            );
            self.bus.publish(m);
            if generation % 10 == 0 {
                tracing::info!(
                    generation,
                    attacker_eff_max = m.attacker_effectiveness.max,
                    defender_cov_max = m.defender_coverage.max,
                    unique_chains = m.unique_kill_chains,
                    "generation complete"
                );
            }
            generations_completed = generation + 1;

            if generation + 1 == self.config.num_generations {
                break;
            }

            // 4-5. Selection and offspring.
            let mut next_attackers = self.breed_attackers(&attackers, &attacker_fit);
            let mut next_defenders = self.breed_defenders(&defenders, &defender_fit);

            // 6. Elitism: HOF members re-enter, replacing tail slots.
            self.inject_attacker_elites(&mut next_attackers);
            self.inject_defender_elites(&mut next_defenders);

            // 7. Stagnation: the collector flags a window with no
            // objective-max movement; a fresh window must elapse after
            // each injection before the next can fire.
            if generations_completed >= stagnation_muted_until
                && self.metrics.detect_stagnation(
                    self.config.stagnation_window,
                    self.config.stagnation_epsilon,
                )
            {
                tracing::info!(generation, "stagnation detected; injecting immigrants");
                self.inject_immigrants(&mut next_attackers, &mut next_defenders);
                stagnation_muted_until = generations_completed + self.config.stagnation_window;
            }

            attackers = next_attackers;
            defenders = next_defenders;
        }

        tracing::info!(generations_completed, "co-evolution finished");

        Ok(EvolutionResult {
            config: self.config.clone(),
            history: self.metrics.history.clone(),
            attacker_hof: self.attacker_hof.clone(),
            defender_hof: self.defender_hof.clone(),
            final_attackers: attackers,
            final_defenders: defenders,
            generations_completed,
        })
    }

    fn evaluate_attackers(
        &self,
        generation: u64,
        attackers: &[AttackGenome],
        defenders: &[DefenseGenome],
        opponents: &[Vec<Opponent>],
    ) -> Vec<Vec<MatchSummary>> {
        let jobs: Vec<MatchupJob> = attackers
            .iter()
            .enumerate()
            .flat_map(|(i, attacker)| {
                opponents[i].iter().map(move |opp| {
                    let (defender, opp_id) = match opp {
                        Opponent::Pop(p) => (&defenders[*p], *p as u64),
                        Opponent::Hof(h) => {
                            (&self.defender_hof[*h].genome, HOF_OPPONENT_OFFSET + *h as u64)
                        }
                    };
                    MatchupJob {
                        attacker,
                        defender,
                        seed: substream_seed(self.config.seed, generation, 0, i as u64, opp_id),
                    }
                })
            })
            .collect();

        let summaries = run_matchups(&self.network, &jobs);
        summaries
            .chunks(self.config.matchups_per_eval)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    fn evaluate_defenders(
        &self,
        generation: u64,
        attackers: &[AttackGenome],
        defenders: &[DefenseGenome],
        opponents: &[Vec<Opponent>],
    ) -> Vec<Vec<MatchSummary>> {
        let jobs: Vec<MatchupJob> = defenders
            .iter()
            .enumerate()
            .flat_map(|(i, defender)| {
                opponents[i].iter().map(move |opp| {
                    let (attacker, opp_id) = match opp {
                        Opponent::Pop(p) => (&attackers[*p], *p as u64),
                        Opponent::Hof(h) => {
                            (&self.attacker_hof[*h].genome, HOF_OPPONENT_OFFSET + *h as u64)
                        }
                    };
                    MatchupJob {
                        attacker,
                        defender,
                        seed: substream_seed(self.config.seed, generation, 1, i as u64, opp_id),
                    }
                })
            })
            .collect();

        let summaries = run_matchups(&self.network, &jobs);
        summaries
            .chunks(self.config.matchups_per_eval)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    fn breed_attackers(
        &mut self,
        population: &[AttackGenome],
        fitness: &[FitnessVec],
    ) -> Vec<AttackGenome> {
        let ranked = nsga::rank_population(fitness);
        let n = population.len();
        let mut children = Vec::with_capacity(n);

        while children.len() < n {
            let p1 = nsga::binary_tournament(&ranked, &mut self.rng);
            let p2 = nsga::binary_tournament(&ranked, &mut self.rng);
            let (a, b) = (&population[p1], &population[p2]);

            let (mut c1, mut c2) = if self.rng.gen::<f64>() < self.config.crossover_rate {
                let mut crossed = None;
                for _ in 0..OPERATOR_RETRIES {
                    if let Ok(pair) = (self.operators.attacker_crossover)(a, b, &mut self.rng) {
                        crossed = Some(pair);
                        break;
                    }
                }
                crossed.unwrap_or_else(|| {
                    let fitter = if fitness[p1][0] >= fitness[p2][0] { a } else { b };
                    (fitter.clone(), fitter.clone())
                })
            } else {
                (a.clone(), b.clone())
            };

            if self.rng.gen::<f64>() < self.config.mutation_rate {
                c1 = self.mutate_attacker(&c1);
            }
            if self.rng.gen::<f64>() < self.config.mutation_rate {
                c2 = self.mutate_attacker(&c2);
            }

            children.push(c1);
            if children.len() < n {
                children.push(c2);
            }
        }
        children
    }

    fn mutate_attacker(&mut self, genome: &AttackGenome) -> AttackGenome {
        for _ in 0..OPERATOR_RETRIES {
            if let Ok(mutated) = (self.operators.attacker_mutate)(genome, &mut self.rng) {
                return mutated;
            }
        }
        genome.clone()
    }

    fn breed_defenders(
        &mut self,
        population: &[DefenseGenome],
        fitness: &[FitnessVec],
    ) -> Vec<DefenseGenome> {
        let ranked = nsga::rank_population(fitness);
        let n = population.len();
        let mut children = Vec::with_capacity(n);

        while children.len() < n {
            let p1 = nsga::binary_tournament(&ranked, &mut self.rng);
            let p2 = nsga::binary_tournament(&ranked, &mut self.rng);
            let (a, b) = (&population[p1], &population[p2]);

            let (mut c1, mut c2) = if self.rng.gen::<f64>() < self.config.crossover_rate {
                let mut crossed = None;
                for _ in 0..OPERATOR_RETRIES {
                    if let Ok(pair) = (self.operators.defender_crossover)(a, b, &mut self.rng) {
                        crossed = Some(pair);
                        break;
                    }
                }
                crossed.unwrap_or_else(|| {
                    let fitter = if fitness[p1][0] >= fitness[p2][0] { a } else { b };
                    (fitter.clone(), fitter.clone())
                })
            } else {
                (a.clone(), b.clone())
            };

            if self.rng.gen::<f64>() < self.config.mutation_rate {
                c1 = self.mutate_defender(&c1);
            }
            if self.rng.gen::<f64>() < self.config.mutation_rate {
                c2 = self.mutate_defender(&c2);
            }

            children.push(c1);
            if children.len() < n {
                children.push(c2);
            }
        }
        children
    }

    fn mutate_defender(&mut self, genome: &DefenseGenome) -> DefenseGenome {
        for _ in 0..OPERATOR_RETRIES {
            if let Ok(mutated) = (self.operators.defender_mutate)(genome, &mut self.rng) {
                return mutated;
            }
        }
        genome.clone()
    }

    fn update_attacker_hof(&mut self, population: &[AttackGenome], fitness: &[FitnessVec]) {
        let mut candidates = std::mem::take(&mut self.attacker_hof);
        for (genome, fit) in population.iter().zip(fitness) {
            let chain: Vec<String> = genome.chain().iter().map(|s| s.to_string()).collect();
            if candidates.iter().any(|e| e.kill_chain == chain) {
                continue;
            }
            candidates.push(HofAttacker {
                kill_chain: chain,
                fitness: *fit,
                genome: genome.clone(),
            });
        }
        let vectors: Vec<FitnessVec> = candidates.iter().map(|e| e.fitness).collect();
        let keep = nsga::select_best(&vectors, self.config.hall_of_fame_size);
        self.attacker_hof = keep.into_iter().map(|i| candidates[i].clone()).collect();
    }

    fn update_defender_hof(&mut self, population: &[DefenseGenome], fitness: &[FitnessVec]) {
        let mut candidates = std::mem::take(&mut self.defender_hof);
        for (genome, fit) in population.iter().zip(fitness) {
            let mut techniques: Vec<String> = genome
                .genes()
                .iter()
                .map(|g| format!("{}:{}:{:?}", g.technique_detected, g.data_source, g.detection_logic))
                .collect();
            techniques.sort();
            if candidates.iter().any(|e| e.techniques == techniques) {
                continue;
            }
            candidates.push(HofDefender {
                techniques,
                fitness: *fit,
                genome: genome.clone(),
            });
        }
        let vectors: Vec<FitnessVec> = candidates.iter().map(|e| e.fitness).collect();
        let keep = nsga::select_best(&vectors, self.config.hall_of_fame_size);
        self.defender_hof = keep.into_iter().map(|i| candidates[i].clone()).collect();
    }

    fn elite_count(&self) -> usize {
        let quota = (0.05 * self.config.population_size as f64).floor() as usize;
        self.config
            .hall_of_fame_size
            .min(quota)
            .max(1)
            .min(self.config.population_size)
    }

    fn inject_attacker_elites(&mut self, next: &mut [AttackGenome]) {
        let count = self.elite_count().min(self.attacker_hof.len());
        let n = next.len();
        for i in 0..count {
            next[n - 1 - i] = self.attacker_hof[i].genome.clone();
        }
    }

    fn inject_defender_elites(&mut self, next: &mut [DefenseGenome]) {
        let count = self.elite_count().min(self.defender_hof.len());
        let n = next.len();
        for i in 0..count {
            next[n - 1 - i] = self.defender_hof[i].genome.clone();
        }
    }

    fn inject_immigrants(
        &mut self,
        attackers: &mut [AttackGenome],
        defenders: &mut [DefenseGenome],
    ) {
        let n = attackers.len();
        let count = ((n as f64 * self.config.immigrant_fraction) as usize).max(1).min(n);

        let slots = rand::seq::index::sample(&mut self.rng, n, count);
        for slot in slots.iter() {
            attackers[slot] = (self.operators.attacker_init)(&mut self.rng, &self.config);
        }
        let slots = rand::seq::index::sample(&mut self.rng, n, count);
        for slot in slots.iter() {
            defenders[slot] = (self.operators.defender_init)(&mut self.rng, &self.config);
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

#[derive(Debug, Clone, Copy)]
enum Opponent {
    Pop(usize),
    Hof(usize),
}

/// ⌈(1−α)·k⌉ opponents from the live population, the rest from the hall
/// of fame (all from the population while the HOF is empty).
fn sample_opponents<R: Rng>(
    rng: &mut R,
    pop_len: usize,
    hof_len: usize,
    k: usize,
    hof_fraction: f64,
) -> Vec<Opponent> {
    let from_pop = ((1.0 - hof_fraction) * k as f64).ceil() as usize;
    let from_hof = if hof_len == 0 { 0 } else { k.saturating_sub(from_pop) };
    let from_pop = k - from_hof;

    let mut opponents = Vec::with_capacity(k);
    for _ in 0..from_pop {
        opponents.push(Opponent::Pop(rng.gen_range(0..pop_len)));
    }
    for _ in 0..from_hof {
        opponents.push(Opponent::Hof(rng.gen_range(0..hof_len)));
    }
    opponents
}

struct MatchupJob<'a> {
    attacker: &'a AttackGenome,
    defender: &'a DefenseGenome,
    seed: u64,
}

/// Dispatch matchups over a scoped worker pool. Each job carries its own
/// substream seed and writes to its own slot, so worker count never
/// changes the outcome.
fn run_matchups(network: &NetworkGraph, jobs: &[MatchupJob]) -> Vec<MatchSummary> {
    if jobs.is_empty() {
        return Vec::new();
    }
    let workers = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .min(jobs.len());
    let chunk_size = (jobs.len() + workers - 1) / workers;

    let mut results: Vec<Option<MatchSummary>> = Vec::with_capacity(jobs.len());
    results.resize_with(jobs.len(), || None);

    std::thread::scope(|scope| {
        for (job_chunk, result_chunk) in jobs.chunks(chunk_size).zip(results.chunks_mut(chunk_size))
        {
            scope.spawn(move || {
                for (job, slot) in job_chunk.iter().zip(result_chunk.iter_mut()) {
                    let mut rng = ChaCha8Rng::seed_from_u64(job.seed);
                    let result = simulate(job.attacker, job.defender, network, &mut rng);
                    *slot = Some(result.summary);
                }
            });
        }
    });

    results
        .into_iter()
        .map(|slot| slot.expect("every matchup slot filled"))
        .collect()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Deterministic per-matchup seed keyed by (run seed, generation, side,
/// individual, opponent).
fn substream_seed(seed: u64, generation: u64, side: u64, individual: u64, opponent: u64) -> u64 {
    let mut acc = splitmix64(seed);
    for part in [generation, side, individual, opponent] {
        acc = splitmix64(acc ^ part);
    }
    acc
}

fn hof_top<T>(hof: &[T], fitness: impl Fn(&T) -> FitnessVec) -> Option<FitnessVec> {
    hof.iter()
        .map(&fitness)
        .max_by(|a, b| a[0].partial_cmp(&b[0]).expect("finite fitness"))
}

/// Write the run's durable artifacts: config.json, evolution_log.json,
/// and both hall-of-fame files.
pub fn save_results(result: &EvolutionResult, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = output_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&dir)?;

    std::fs::write(
        dir.join("config.json"),
        serde_json::to_string_pretty(&result.config)?,
    )?;
    std::fs::write(
        dir.join("evolution_log.json"),
        serde_json::to_string_pretty(&result.history)?,
    )?;
    std::fs::write(
        dir.join("hall_of_fame_attackers.json"),
        serde_json::to_string_pretty(&result.attacker_hof)?,
    )?;
    std::fs::write(
        dir.join("hall_of_fame_defenders.json"),
        serde_json::to_string_pretty(&result.defender_hof)?,
    )?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::topology::TopologyBuilder;

    fn small_config() -> Config {
        Config {
            population_size: 8,
            num_generations: 4,
            matchups_per_eval: 3,
            defender_budget: 5,
            max_attack_chain_length: 4,
            hall_of_fame_size: 4,
            seed: 42,
            ..Config::default()
        }
    }

    #[test]
    fn test_substream_seeds_are_distinct() {
        let a = substream_seed(42, 0, 0, 1, 2);
        let b = substream_seed(42, 0, 0, 2, 1);
        let c = substream_seed(42, 0, 1, 1, 2);
        let d = substream_seed(42, 1, 0, 1, 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, substream_seed(42, 0, 0, 1, 2));
    }

    #[test]
    fn test_opponent_sampling_split() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let opponents = sample_opponents(&mut rng, 10, 5, 5, 0.2);
        assert_eq!(opponents.len(), 5);
        let hof_count = opponents
            .iter()
            .filter(|o| matches!(o, Opponent::Hof(_)))
            .count();
        assert_eq!(hof_count, 1);

        // Empty HOF falls back entirely to the population.
        let opponents = sample_opponents(&mut rng, 10, 0, 5, 0.2);
        assert!(opponents.iter().all(|o| matches!(o, Opponent::Pop(_))));
    }

    #[test]
    fn test_run_completes_all_generations() {
        let network = TopologyBuilder::corporate_medium();
        let mut engine = CoevolutionEngine::new(small_config(), network).unwrap();
        let result = engine.run().unwrap();

        assert_eq!(result.generations_completed, 4);
        assert_eq!(result.history.len(), 4);
        assert_eq!(result.final_attackers.len(), 8);
        assert_eq!(result.final_defenders.len(), 8);
        assert!(!result.attacker_hof.is_empty());
        assert!(!result.defender_hof.is_empty());
    }

    #[test]
    fn test_run_is_deterministic() {
        let network = TopologyBuilder::corporate_medium();
        let r1 = CoevolutionEngine::new(small_config(), network.clone())
            .unwrap()
            .run()
            .unwrap();
        let r2 = CoevolutionEngine::new(small_config(), network).unwrap().run().unwrap();

        assert_eq!(
            serde_json::to_vec(&r1.history).unwrap(),
            serde_json::to_vec(&r2.history).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&r1.attacker_hof).unwrap(),
            serde_json::to_vec(&r2.attacker_hof).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&r1.defender_hof).unwrap(),
            serde_json::to_vec(&r2.defender_hof).unwrap()
        );
    }

    #[test]
    fn test_cancellation_truncates_cleanly() {
        let network = TopologyBuilder::corporate_medium();
        let mut engine = CoevolutionEngine::new(small_config(), network).unwrap();
        engine.cancel_handle().store(true, Ordering::Relaxed);
        let result = engine.run().unwrap();
        assert_eq!(result.generations_completed, 0);
        assert!(result.history.is_empty());
    }

    #[test]
    fn test_metrics_stream_sees_generations() {
        let network = TopologyBuilder::corporate_medium();
        let mut engine = CoevolutionEngine::new(small_config(), network).unwrap();
        let subscriber = engine.subscribe_metrics();
        engine.run().unwrap();

        let streamed = subscriber.drain();
        assert_eq!(streamed.len(), 4);
        assert_eq!(streamed[0].generation, 0);
        assert_eq!(streamed[3].generation, 3);
    }

    #[test]
    fn test_save_results_layout() {
        let network = TopologyBuilder::corporate_medium();
        let mut engine = CoevolutionEngine::new(small_config(), network).unwrap();
        let result = engine.run().unwrap();

        let dir = std::env::temp_dir().join(format!("aces-test-{}", std::process::id()));
        let saved = save_results(&result, &dir).unwrap();
        for file in [
            "config.json",
            "evolution_log.json",
            "hall_of_fame_attackers.json",
            "hall_of_fame_defenders.json",
        ] {
            assert!(saved.join(file).exists(), "{file}");
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
