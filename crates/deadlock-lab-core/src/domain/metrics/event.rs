//! Metric events emitted by workers
//!
//! Events from one worker arrive in causal order; events from different
//! workers interleave arbitrarily.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::resources::ResourceId;
use crate::domain::worker::WorkerStatus;

/// Kind of metric event, with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricEventKind {
    /// The worker began running
    Started,
    /// A resource was acquired after waiting `waited_ms`
    Acquired { resource: ResourceId, waited_ms: u64 },
    /// A timed acquisition gave up
    TimedOut { resource: ResourceId, waited_ms: u64 },
    /// A held resource was released
    Released { resource: ResourceId },
    /// The worker is backing off before retry number `retries`
    Retry { retries: u32, backoff_ms: u64 },
    /// The worker reached a terminal state
    Finished {
        status: WorkerStatus,
        duration_secs: f64,
        wait_secs: f64,
        retries: u32,
    },
}

impl MetricEventKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Acquired { .. } => "acquired",
            Self::TimedOut { .. } => "timed_out",
            Self::Released { .. } => "released",
            Self::Retry { .. } => "retry",
            Self::Finished { .. } => "finished",
        }
    }

    /// Terminal events close a worker's record
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// One immutable metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Worker index within the scenario
    pub worker_id: usize,
    /// Worker name (e.g. "P1")
    pub worker: String,
    /// What happened
    #[serde(flatten)]
    pub kind: MetricEventKind,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    /// Create a new event stamped with the current time
    pub fn new(worker_id: usize, worker: impl Into<String>, kind: MetricEventKind) -> Self {
        Self {
            worker_id,
            worker: worker.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Seconds with millisecond precision
pub fn secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Whole milliseconds, saturating
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = MetricEvent::new(
            0,
            "P1",
            MetricEventKind::Acquired {
                resource: ResourceId::B,
                waited_ms: 12,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["worker"], "P1");
        assert_eq!(value["kind"], "acquired");
        assert_eq!(value["resource"], "B");
        assert_eq!(value["waited_ms"], 12);
    }

    #[test]
    fn test_terminal_kinds() {
        let finished = MetricEventKind::Finished {
            status: WorkerStatus::Ok,
            duration_secs: 1.5,
            wait_secs: 0.2,
            retries: 0,
        };
        assert!(finished.is_terminal());
        assert_eq!(finished.as_str(), "finished");
        assert!(!MetricEventKind::Started.is_terminal());
    }

    #[test]
    fn test_secs_rounds_to_millis() {
        assert_eq!(secs(Duration::from_micros(1_234_567)), 1.235);
        assert_eq!(millis(Duration::from_micros(2_500)), 2);
    }
}
