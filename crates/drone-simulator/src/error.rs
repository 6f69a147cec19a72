//! Simulator error types

use drone_domain::DomainError;
use thiserror::Error;

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Drone task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
