use serde::{Deserialize, Serialize};

use crate::error::{AcesError, Result};

/// Weights used in fitness scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    // Attacker effectiveness weights
    pub host_criticality_multiplier: f64,
    pub credential_value: f64,
    pub exfiltration_bonus: f64,
    pub kill_chain_length_value: f64,

    // Defender coverage/efficiency weights
    pub detection_value: f64,
    pub prevention_value: f64,
    pub no_exfil_bonus: f64,
    pub false_positive_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            host_criticality_multiplier: 10.0,
            credential_value: 3.0,
            exfiltration_bonus: 50.0,
            kill_chain_length_value: 2.0,
            detection_value: 10.0,
            prevention_value: 10.0,
            no_exfil_bonus: 30.0,
            false_positive_penalty: 5.0,
        }
    }
}

/// Central configuration for an ACES run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Population parameters
    pub population_size: usize,
    pub num_generations: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,

    // Genome constraints
    pub max_attack_chain_length: usize,
    pub defender_budget: u32,

    // Evolution
    pub hall_of_fame_size: usize,
    pub matchups_per_eval: usize,
    pub stagnation_window: usize,
    pub stagnation_epsilon: f64,
    pub immigrant_fraction: f64,
    pub hof_opponent_fraction: f64,

    // Scoring
    pub scoring: ScoringWeights,

    // Output
    pub output_dir: String,

    // Reproducibility
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            population_size: 80,
            num_generations: 300,
            tournament_size: 5,
            crossover_rate: 0.7,
            mutation_rate: 0.2,
            max_attack_chain_length: 12,
            defender_budget: 15,
            hall_of_fame_size: 10,
            matchups_per_eval: 5,
            stagnation_window: 20,
            stagnation_epsilon: 0.5,
            immigrant_fraction: 0.1,
            hof_opponent_fraction: 0.2,
            scoring: ScoringWeights::default(),
            output_dir: "results".to_string(),
            seed: 42,
        }
    }
}

impl Config {
    /// Validate the configuration, failing fast before any evaluation.
    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(AcesError::Config("population_size must be > 0".into()));
        }
        if self.num_generations == 0 {
            return Err(AcesError::Config("num_generations must be > 0".into()));
        }
        if self.defender_budget < 1 {
            return Err(AcesError::Config("defender_budget must be >= 1".into()));
        }
        if self.max_attack_chain_length == 0 {
            return Err(AcesError::Config("max_attack_chain_length must be > 0".into()));
        }
        if self.matchups_per_eval == 0 {
            return Err(AcesError::Config("matchups_per_eval must be > 0".into()));
        }
        for (name, rate) in [
            ("crossover_rate", self.crossover_rate),
            ("mutation_rate", self.mutation_rate),
            ("immigrant_fraction", self.immigrant_fraction),
            ("hof_opponent_fraction", self.hof_opponent_fraction),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(AcesError::Config(format!("{name} must be in [0, 1], got {rate}")));
            }
        }
        let w = &self.scoring;
        for (name, weight) in [
            ("host_criticality_multiplier", w.host_criticality_multiplier),
            ("credential_value", w.credential_value),
            ("exfiltration_bonus", w.exfiltration_bonus),
            ("kill_chain_length_value", w.kill_chain_length_value),
            ("detection_value", w.detection_value),
            ("prevention_value", w.prevention_value),
            ("no_exfil_bonus", w.no_exfil_bonus),
            ("false_positive_penalty", w.false_positive_penalty),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(AcesError::Config(format!("scoring weight {name} must be finite and >= 0")));
            }
        }
        Ok(())
    }

    /// Parse a config from a JSON document. Missing fields take defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `ACES_*` environment variables
    /// (e.g. `ACES_POPULATION_SIZE=40`, `ACES_SEED=7`).
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Some(v) = env_parse("ACES_POPULATION_SIZE")? {
            config.population_size = v;
        }
        if let Some(v) = env_parse("ACES_NUM_GENERATIONS")? {
            config.num_generations = v;
        }
        if let Some(v) = env_parse("ACES_TOURNAMENT_SIZE")? {
            config.tournament_size = v;
        }
        if let Some(v) = env_parse("ACES_CROSSOVER_RATE")? {
            config.crossover_rate = v;
        }
        if let Some(v) = env_parse("ACES_MUTATION_RATE")? {
            config.mutation_rate = v;
        }
        if let Some(v) = env_parse("ACES_MAX_ATTACK_CHAIN_LENGTH")? {
            config.max_attack_chain_length = v;
        }
        if let Some(v) = env_parse("ACES_DEFENDER_BUDGET")? {
            config.defender_budget = v;
        }
        if let Some(v) = env_parse("ACES_MATCHUPS_PER_EVAL")? {
            config.matchups_per_eval = v;
        }
        if let Some(v) = env_parse("ACES_SEED")? {
            config.seed = v;
        }
        if let Ok(v) = std::env::var("ACES_OUTPUT_DIR") {
            config.output_dir = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AcesError::Config(format!("cannot parse {key}={raw}"))),
        Err(_) => Ok(None),
    }
}
