//! Deadlock Lab Core Library
//!
//! This crate provides the core functionality for Deadlock Lab, including:
//! - Exclusive resources A and B with owned guards
//! - Naive, ordered and retry workers
//! - Scenarios supervised by a deadline-based deadlock detector
//! - Banker's-algorithm avoidance over counted resources
//! - Metrics collection, summaries and JSON/CSV export
//! - TOML configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod export;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::metrics::ScenarioSummary;
    pub use crate::domain::scenario::{
        ProgressReporter, Scenario, ScenarioKind, ScenarioOutcome, ScenarioRun,
        ScenarioSelector, ScenarioSettings,
    };
    pub use crate::error::{Error, Result};
    pub use crate::export::{ExportFormat, ExportOutcome, export_summaries};
}
