//! Scenario summaries aggregated from metric events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::event::{MetricEvent, MetricEventKind, secs};
use crate::domain::scenario::ScenarioOutcome;
use crate::domain::worker::WorkerStatus;

/// Everything the summary needs that does not travel as an event
#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub run_id: Uuid,
    /// Scenario title
    pub scenario: String,
    /// Short scenario tag
    pub tag: String,
    pub outcome: ScenarioOutcome,
    pub started_at: DateTime<Utc>,
    /// Wall time of the whole run
    pub elapsed: Duration,
    /// Names of every spawned worker, in spawn order
    pub workers: Vec<String>,
}

/// Per-worker breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub name: String,
    pub status: WorkerStatus,
    /// Seconds from start to terminal state
    pub duration_secs: Option<f64>,
    /// Seconds spent blocked inside acquisitions
    pub wait_secs: Option<f64>,
    pub retries: u32,
    /// Number of events received from this worker
    pub events: usize,
}

/// Read-only aggregate of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub run_id: Uuid,
    pub scenario: String,
    pub tag: String,
    pub outcome: ScenarioOutcome,
    pub deadlock: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub workers: Vec<WorkerReport>,
    /// Spawned workers that never produced a terminal record
    pub unreported: Vec<String>,
    /// Mean duration over workers that completed normally
    pub mean_duration_secs: Option<f64>,
    pub mean_retries: Option<f64>,
    pub mean_wait_secs: Option<f64>,
}

#[derive(Debug, Default)]
struct Accumulator {
    worker_id: usize,
    status: Option<WorkerStatus>,
    duration: Option<f64>,
    wait: Option<f64>,
    retries: u32,
    events: usize,
}

impl ScenarioSummary {
    /// Fold events (in any cross-worker order) into a summary
    pub fn from_events(context: SummaryContext, events: &[MetricEvent]) -> Self {
        let mut by_worker: BTreeMap<String, Accumulator> = BTreeMap::new();

        for event in events {
            let acc = by_worker.entry(event.worker.clone()).or_default();
            acc.worker_id = event.worker_id;
            acc.events += 1;
            match &event.kind {
                MetricEventKind::Retry { retries, .. } => {
                    acc.retries = acc.retries.max(*retries);
                }
                MetricEventKind::Finished {
                    status,
                    duration_secs,
                    wait_secs,
                    retries,
                } => {
                    acc.status = Some(*status);
                    acc.duration = Some(*duration_secs);
                    acc.wait = Some(*wait_secs);
                    acc.retries = acc.retries.max(*retries);
                }
                _ => {}
            }
        }

        let mut reports: Vec<WorkerReport> = by_worker
            .into_iter()
            .filter_map(|(name, acc)| {
                acc.status.map(|status| WorkerReport {
                    worker_id: acc.worker_id,
                    name,
                    status,
                    duration_secs: acc.duration,
                    wait_secs: acc.wait,
                    retries: acc.retries,
                    events: acc.events,
                })
            })
            .collect();
        reports.sort_by_key(|r| r.worker_id);

        let unreported = context
            .workers
            .iter()
            .filter(|name| !reports.iter().any(|r| &r.name == *name))
            .cloned()
            .collect();

        let completed: Vec<&WorkerReport> = reports
            .iter()
            .filter(|r| r.status == WorkerStatus::Ok)
            .collect();

        let mean_duration_secs = mean(completed.iter().filter_map(|r| r.duration_secs));
        let mean_retries = mean(reports.iter().map(|r| f64::from(r.retries)));
        let mean_wait_secs = mean(reports.iter().filter_map(|r| r.wait_secs));

        Self {
            run_id: context.run_id,
            scenario: context.scenario,
            tag: context.tag,
            outcome: context.outcome,
            deadlock: context.outcome == ScenarioOutcome::DeadlockDetected,
            started_at: context.started_at,
            elapsed_secs: secs(context.elapsed),
            workers: reports,
            unreported,
            mean_duration_secs,
            mean_retries,
            mean_wait_secs,
        }
    }

    /// Combined retries across all workers
    pub fn total_retries(&self) -> u32 {
        self.workers.iter().map(|r| r.retries).sum()
    }

    /// Report for one worker, by name
    pub fn worker(&self, name: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|r| r.name == name)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resources::ResourceId;

    fn context(outcome: ScenarioOutcome, workers: &[&str]) -> SummaryContext {
        SummaryContext {
            run_id: Uuid::new_v4(),
            scenario: "Scenario 3: recovery with timeout + backoff".to_string(),
            tag: "retry".to_string(),
            outcome,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(2500),
            workers: workers.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn finished(id: usize, name: &str, status: WorkerStatus, duration: f64, retries: u32) -> MetricEvent {
        MetricEvent::new(
            id,
            name,
            MetricEventKind::Finished {
                status,
                duration_secs: duration,
                wait_secs: 0.5,
                retries,
            },
        )
    }

    #[test]
    fn test_interleaved_events_aggregate_per_worker() {
        let events = vec![
            MetricEvent::new(1, "P2", MetricEventKind::Started),
            MetricEvent::new(0, "P1", MetricEventKind::Started),
            MetricEvent::new(
                0,
                "P1",
                MetricEventKind::Acquired {
                    resource: ResourceId::A,
                    waited_ms: 0,
                },
            ),
            MetricEvent::new(
                1,
                "P2",
                MetricEventKind::Retry {
                    retries: 1,
                    backoff_ms: 400,
                },
            ),
            finished(1, "P2", WorkerStatus::Ok, 3.0, 1),
            finished(0, "P1", WorkerStatus::Ok, 1.0, 0),
        ];

        let summary =
            ScenarioSummary::from_events(context(ScenarioOutcome::AllCompleted, &["P1", "P2"]), &events);

        assert_eq!(summary.workers.len(), 2);
        assert_eq!(summary.workers[0].name, "P1");
        assert_eq!(summary.workers[0].events, 3);
        assert_eq!(summary.worker("P2").unwrap().retries, 1);
        assert_eq!(summary.total_retries(), 1);
        assert_eq!(summary.mean_duration_secs, Some(2.0));
        assert_eq!(summary.mean_retries, Some(0.5));
        assert_eq!(summary.mean_wait_secs, Some(0.5));
        assert!(summary.unreported.is_empty());
        assert!(!summary.deadlock);
        assert_eq!(summary.elapsed_secs, 2.5);
    }

    #[test]
    fn test_killed_workers_excluded_from_mean_duration() {
        let events = vec![
            finished(0, "P1", WorkerStatus::Killed, 5.0, 0),
            finished(1, "P2", WorkerStatus::Killed, 5.0, 0),
        ];

        let summary = ScenarioSummary::from_events(
            context(ScenarioOutcome::DeadlockDetected, &["P1", "P2"]),
            &events,
        );

        assert!(summary.deadlock);
        assert_eq!(summary.workers.len(), 2);
        assert_eq!(summary.mean_duration_secs, None);
    }

    #[test]
    fn test_missing_terminal_event_is_unreported() {
        let events = vec![
            MetricEvent::new(0, "P1", MetricEventKind::Started),
            finished(1, "P2", WorkerStatus::Ok, 1.0, 0),
        ];

        let summary = ScenarioSummary::from_events(
            context(ScenarioOutcome::AllCompleted, &["P1", "P2", "P3"]),
            &events,
        );

        assert_eq!(summary.workers.len(), 1);
        assert_eq!(summary.unreported, vec!["P1".to_string(), "P3".to_string()]);
    }

    #[test]
    fn test_empty_events() {
        let summary = ScenarioSummary::from_events(context(ScenarioOutcome::AllCompleted, &[]), &[]);
        assert!(summary.workers.is_empty());
        assert_eq!(summary.mean_retries, None);
    }
}
