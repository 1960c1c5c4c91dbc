//! Error types for Deadlock Lab
//!
//! Deadlocks, acquisition timeouts and forced terminations are expected
//! outcomes of a scenario and never show up here. This enum only carries
//! faults that abort a run.

use thiserror::Error;

use crate::domain::resources::ResourceError;

/// Result type alias using Deadlock Lab's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Deadlock Lab error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Resource errors (E100-E199)
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    // Scenario errors (E200-E299)
    #[error("Unknown scenario '{0}'. Valid scenarios: todos, deadlock, ordenado, retry, banker.")]
    UnknownScenario(String),

    #[error("Worker '{0}' aborted unexpectedly: {1}")]
    WorkerAborted(String, String),

    // Export errors (E300-E399)
    #[error("Unknown metrics format '{0}'. Use `json` or `csv`.")]
    UnknownFormat(String),

    #[error("Failed to export metrics: {0}")]
    ExportFailed(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resource(err) => err.code(),
            Self::UnknownScenario(_) => "E200",
            Self::WorkerAborted(..) => "E201",
            Self::UnknownFormat(_) => "E300",
            Self::ExportFailed(_) => "E301",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnknownScenario(_) => Some("deadlock-lab --help".to_string()),
            Self::UnknownFormat(_) => Some("deadlock-lab --metrics-format json".to_string()),
            Self::ConfigError(_) => Some("deadlock-lab config list".to_string()),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        let reason = if err.is_panic() { "panicked" } else { "was cancelled" };
        Self::WorkerAborted(format!("{:?}", err.id()), reason.to_string())
    }
}
