//! # ACES: Adversarial Co-Evolution Simulator
//!
//! A cybersecurity research simulator that co-evolves two competing
//! populations (offensive attacker agents and defensive detector
//! agents) with a multi-objective genetic algorithm over a simulated
//! enterprise network. This library provides:
//!
//! - **Technique catalog**: 38 modeled MITRE ATT&CK techniques with
//!   preconditions, effects, and data sources
//! - **Network model**: segmented corporate topology with services,
//!   vulnerabilities, credentials, and reachability queries
//! - **Matchup engine**: deterministic execution of one kill chain
//!   against one detection rule set on a cloned network
//! - **Co-evolution**: NSGA-II selection, hall-of-fame elitism, and
//!   stagnation recovery driving both populations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aces::config::Config;
//! use aces::evolution::{save_results, CoevolutionEngine};
//! use aces::network::topology::TopologyBuilder;
//!
//! let config = Config { num_generations: 50, ..Config::default() };
//! let network = TopologyBuilder::corporate_medium();
//! let mut engine = CoevolutionEngine::new(config, network).unwrap();
//! let result = engine.run().unwrap();
//! save_results(&result, &result.config.output_dir).unwrap();
//! ```

pub mod attack;
pub mod catalog;
pub mod config;
pub mod defense;
pub mod error;
pub mod evolution;
pub mod network;
pub mod scoring;
pub mod simulation;

// Re-export commonly used types
pub use attack::{AttackGene, AttackGenome, TargetSelector};
pub use catalog::{catalog, Tactic, TechniqueCatalog, TechniqueSpec};
pub use config::{Config, ScoringWeights};
pub use defense::{DefenseGenome, DetectionGene, DetectionLogic, ResponseAction};
pub use error::{AcesError, Result};
pub use evolution::{CoevolutionEngine, EvolutionResult, GenerationMetrics, Operators};
pub use network::{Credential, Host, HostRole, NetworkGraph, PrivilegeLevel};
pub use scoring::{attacker_fitness, defender_fitness, FitnessVec};
pub use simulation::{simulate, EventOutcome, MatchResult, MatchSummary, SimEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
