use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid province code: {0}")]
    UnknownRegion(String),
    #[error(
        "Unable to generate a return sequence averaging {average} within [{min}, {max}] after {attempts} attempts"
    )]
    InfeasibleReturnSequence {
        attempts: u32,
        average: f64,
        min: f64,
        max: f64,
    },
    #[error("Unknown return_sequence_type: {0}")]
    UnknownReturnSequence(String),
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
    #[error("{0}")]
    InvalidInputs(String),
    #[error("invalid YAML: {0}")]
    ReferenceData(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
