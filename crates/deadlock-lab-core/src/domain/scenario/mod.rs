//! Scenarios and the deadlock detector
//!
//! A `Scenario` is one configured run: it owns a fresh set of resources, a
//! metrics collector and a cancellation token, spawns its workers, and lets a
//! `DeadlockDetector` decide whether the run completed or deadlocked.
//!
//! # Example
//!
//! ```ignore
//! use deadlock_lab_core::domain::scenario::{Scenario, ScenarioSettings};
//!
//! let run = Scenario::retry(ScenarioSettings::default()).run().await?;
//! println!("{} after {} retries", run.outcome, run.total_retries());
//! ```

pub mod detector;
pub mod progress;
pub mod runner;
pub mod types;

pub use detector::{DeadlockDetector, DeadlockReport, StuckWorker, Verdict, WaitEdge, WaitForGraph, WatchedWorker};
pub use progress::{ProgressReporter, RecordingProgress};
pub use runner::{Scenario, ScenarioRun};
pub use types::{ScenarioKind, ScenarioOutcome, ScenarioSelector, ScenarioSettings};
