//! Scenario telemetry
//!
//! Workers emit `MetricEvent`s through a `MetricsSink`; the scenario's
//! `MetricsCollector` drains them and folds them into a `ScenarioSummary`.
//! Serializing summaries lives in [`crate::export`].

pub mod collector;
pub mod event;
pub mod summary;

pub use collector::{DISABLE_TELEMETRY_ENV, MetricsCollector, MetricsSink};
pub use event::{MetricEvent, MetricEventKind};
pub use summary::{ScenarioSummary, SummaryContext, WorkerReport};
