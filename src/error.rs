use thiserror::Error;

/// Error taxonomy for an ACES run.
///
/// Simulation step failures (precondition miss, failed roll, prevented
/// technique) are recorded outcomes, not errors, and never surface here.
#[derive(Debug, Error)]
pub enum AcesError {
    /// Invalid run configuration, rejected before any evaluation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A genome failed its construction invariants.
    #[error("invalid genome: {0}")]
    InvalidGenome(String),

    /// A topology spec referenced unknown hosts or malformed edges.
    #[error("invalid topology: {0}")]
    Topology(String),

    /// Result-directory or metrics-sink IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of config, metrics, or hall-of-fame output failed.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Config file parse failure.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AcesError>;
