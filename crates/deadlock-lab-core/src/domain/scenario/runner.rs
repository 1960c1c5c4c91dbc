//! Scenario orchestration
//!
//! A run builds fresh resources and a collector, spawns one task per worker,
//! hands the state receivers to the detector, joins every task and finally
//! folds the metric events into a summary.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::detector::{DeadlockDetector, DeadlockReport, Verdict, WatchedWorker};
use super::progress::ProgressReporter;
use super::types::{ScenarioKind, ScenarioOutcome, ScenarioSettings};
use crate::domain::banker::{self, Banker, BankerWorker};
use crate::domain::metrics::{MetricsCollector, ScenarioSummary, SummaryContext};
use crate::domain::resources::{ResourceSet, ResourceSnapshot};
use crate::domain::worker::{Worker, WorkerExit, WorkerSpec, WorkerState};
use crate::error::{Error, Result};

/// Everything a finished run leaves behind
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub run_id: Uuid,
    pub kind: ScenarioKind,
    pub outcome: ScenarioOutcome,
    /// Final record of every worker, in spawn order
    pub workers: Vec<WorkerExit>,
    /// Present when the detector fired
    pub deadlock: Option<DeadlockReport>,
    /// `None` when telemetry was disabled
    pub summary: Option<ScenarioSummary>,
    /// Exclusive resources after the run; empty for the banker scenario
    pub resources: Vec<ResourceSnapshot>,
    /// No resource is held by anyone after the run
    pub resources_idle: bool,
    pub elapsed: Duration,
}

impl ScenarioRun {
    pub fn is_deadlock(&self) -> bool {
        self.outcome == ScenarioOutcome::DeadlockDetected
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerExit> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn total_retries(&self) -> u32 {
        self.workers.iter().map(|w| w.retries).sum()
    }

    /// Names of workers that ended in `state`
    pub fn workers_in(&self, state: WorkerState) -> Vec<&str> {
        self.workers
            .iter()
            .filter(|w| w.state == state)
            .map(|w| w.name.as_str())
            .collect()
    }
}

/// Where the workers' resources live
enum Arena {
    Exclusive(ResourceSet),
    Counted(Arc<Banker>),
}

impl Arena {
    fn exclusive(&self) -> Option<&ResourceSet> {
        match self {
            Self::Exclusive(set) => Some(set),
            Self::Counted(_) => None,
        }
    }

    fn snapshots(&self) -> Vec<ResourceSnapshot> {
        self.exclusive().map(ResourceSet::snapshots).unwrap_or_default()
    }

    fn is_idle(&self) -> bool {
        match self {
            Self::Exclusive(set) => set.is_idle(),
            Self::Counted(banker) => banker.is_idle(),
        }
    }
}

struct Launched {
    arena: Arena,
    watched: Vec<WatchedWorker>,
    handles: Vec<JoinHandle<WorkerExit>>,
}

/// One configured scenario
#[derive(Clone)]
pub struct Scenario {
    kind: ScenarioKind,
    settings: ScenarioSettings,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Scenario {
    pub fn new(kind: ScenarioKind, settings: ScenarioSettings) -> Self {
        Self {
            kind,
            settings,
            progress: None,
        }
    }

    /// Naive workers, reversed orders
    pub fn deadlock(settings: ScenarioSettings) -> Self {
        Self::new(ScenarioKind::Deadlock, settings)
    }

    /// Ordered workers, uniform order
    pub fn ordered(settings: ScenarioSettings) -> Self {
        Self::new(ScenarioKind::Ordered, settings)
    }

    /// Retry workers, reversed orders
    pub fn retry(settings: ScenarioSettings) -> Self {
        Self::new(ScenarioKind::Retry, settings)
    }

    /// Banker workers over counted resources
    pub fn banker(settings: ScenarioSettings) -> Self {
        Self::new(ScenarioKind::Banker, settings)
    }

    /// Report worker progress to `reporter`
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn kind(&self) -> ScenarioKind {
        self.kind
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    /// Specs of the two-lock workers; empty for the banker scenario
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        let Some(policy) = self.kind.policy() else {
            return Vec::new();
        };
        (0..self.settings.workers)
            .map(|id| WorkerSpec::new(id, self.kind.order_for(id), policy))
            .collect()
    }

    /// Run to completion, or until the detector kills the stuck workers
    ///
    /// Only the deadlock scenario runs under the detector's deadline; every
    /// other scenario waits for all of its workers.
    ///
    /// Deadlocks and kills are outcomes, not errors. An error means a worker
    /// hit an infrastructure fault or its task could not be joined.
    pub async fn run(&self) -> Result<ScenarioRun> {
        if self.settings.workers == 0 {
            return Err(Error::InvalidInput(
                "a scenario needs at least one worker".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            run_id = %run_id,
            scenario = %self.kind,
            workers = self.settings.workers,
            hold_ms = self.settings.timing.hold_time.as_millis() as u64,
            "Scenario starting"
        );

        let collector = MetricsCollector::start(self.settings.telemetry);
        let cancel = CancellationToken::new();
        let launched = match self.kind {
            ScenarioKind::Banker => self.launch_banker(&collector, &cancel)?,
            _ => self.launch_exclusive(&collector, &cancel),
        };
        let total = launched.handles.len();

        let progress = self.progress.as_deref();
        if let Some(progress) = progress {
            progress.started(total);
        }

        let detector = if self.kind.has_deadline() {
            DeadlockDetector::new(self.settings.deadlock_timeout, cancel.clone())
        } else {
            DeadlockDetector::without_deadline(cancel.clone())
        };
        let verdict = detector
            .supervise(&launched.watched, launched.arena.exclusive(), progress)
            .await;

        let mut exits = Vec::with_capacity(total);
        for handle in launched.handles {
            exits.push(handle.await?);
        }
        if matches!(verdict, Verdict::Deadlock(_)) {
            if let Some(progress) = progress {
                progress.finished(total, total);
            }
        }

        if let Some(failed) = exits.iter().find(|exit| exit.state == WorkerState::Failed) {
            return Err(match &failed.error {
                Some(err) => Error::Resource(err.clone()),
                None => Error::WorkerAborted(failed.name.clone(), "failed".to_string()),
            });
        }

        let (outcome, deadlock) = match verdict {
            Verdict::AllCompleted => (ScenarioOutcome::AllCompleted, None),
            Verdict::Deadlock(report) => (ScenarioOutcome::DeadlockDetected, Some(report)),
        };
        let elapsed = clock.elapsed();

        let summary = collector
            .finish(SummaryContext {
                run_id,
                scenario: self.kind.title().to_string(),
                tag: self.kind.tag().to_string(),
                outcome,
                started_at,
                elapsed,
                workers: exits.iter().map(|exit| exit.name.clone()).collect(),
            })
            .await?;

        let resources_idle = launched.arena.is_idle();
        if !resources_idle {
            warn!(scenario = %self.kind, "Resources still held after the run");
        }
        info!(
            run_id = %run_id,
            scenario = %self.kind,
            outcome = %outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scenario finished"
        );

        Ok(ScenarioRun {
            run_id,
            kind: self.kind,
            outcome,
            workers: exits,
            deadlock,
            summary,
            resources: launched.arena.snapshots(),
            resources_idle,
            elapsed,
        })
    }

    fn launch_exclusive(&self, collector: &MetricsCollector, cancel: &CancellationToken) -> Launched {
        let resources = ResourceSet::new();
        let mut watched = Vec::with_capacity(self.settings.workers);
        let mut handles = Vec::with_capacity(self.settings.workers);

        for spec in self.worker_specs() {
            let order = spec.effective_order();
            let name = spec.name.clone();
            let (worker, state) = Worker::new(
                spec,
                self.settings.timing,
                resources.clone(),
                collector.sink(),
                cancel.child_token(),
            );
            watched.push(WatchedWorker::new(name, Some(order), state));
            handles.push(tokio::spawn(worker.run()));
        }

        Launched {
            arena: Arena::Exclusive(resources),
            watched,
            handles,
        }
    }

    fn launch_banker(
        &self,
        collector: &MetricsCollector,
        cancel: &CancellationToken,
    ) -> Result<Launched> {
        let workers = self.settings.workers;
        let capacity = banker::capacity_for(workers);
        let claims = banker::claims_for(workers);
        for (id, claim) in claims.iter().enumerate() {
            info!(worker = %format!("P{}", id + 1), claim = %claim, capacity = %capacity, "Declared claim");
        }

        let bank = Arc::new(Banker::new(capacity, claims.clone())?);
        let mut watched = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for (id, claim) in claims.into_iter().enumerate() {
            let (worker, state) = BankerWorker::new(
                id,
                claim,
                bank.clone(),
                self.settings.timing.hold_time,
                collector.sink(),
                cancel.child_token(),
            );
            watched.push(WatchedWorker::new(worker.name(), None, state));
            handles.push(tokio::spawn(worker.run()));
        }

        Ok(Launched {
            arena: Arena::Counted(bank),
            watched,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scenario::progress::RecordingProgress;
    use crate::domain::worker::{AcquisitionOrder, Policy, WorkerTiming};

    fn settings() -> ScenarioSettings {
        ScenarioSettings::default()
            .with_timing(WorkerTiming::new(
                Duration::from_millis(100),
                Duration::from_millis(150),
            ))
            .with_deadlock_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_worker_specs_follow_kind() {
        let specs = Scenario::deadlock(settings().with_workers(3)).worker_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].order, AcquisitionOrder::forward());
        assert_eq!(specs[1].order, AcquisitionOrder::reversed());
        assert!(specs.iter().all(|s| s.policy == Policy::Naive));

        let specs = Scenario::ordered(settings()).worker_specs();
        assert!(specs.iter().all(|s| s.effective_order().is_global()));

        assert!(Scenario::banker(settings()).worker_specs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlock_kills_both_workers() {
        let run = Scenario::deadlock(settings()).run().await.unwrap();

        assert_eq!(run.outcome, ScenarioOutcome::DeadlockDetected);
        assert_eq!(run.workers_in(WorkerState::Killed), vec!["P1", "P2"]);
        assert!(run.resources_idle);

        let report = run.deadlock.expect("deadlock report");
        assert_eq!(report.cycle.len(), 2);
        assert_eq!(report.edges.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_completes_with_progress() {
        let progress = Arc::new(RecordingProgress::new());
        let run = Scenario::ordered(settings().with_workers(3))
            .with_progress(progress.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(run.outcome, ScenarioOutcome::AllCompleted);
        assert_eq!(run.workers_in(WorkerState::Done).len(), 3);
        assert!(run.deadlock.is_none());
        assert_eq!(progress.calls(), vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_outlives_deadline_without_kill() {
        // 4 workers x (hold first + hold both) = 800ms, deadline 300ms
        let run = Scenario::ordered(
            settings()
                .with_workers(4)
                .with_deadlock_timeout(Duration::from_millis(300)),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(run.outcome, ScenarioOutcome::AllCompleted);
        assert_eq!(run.workers_in(WorkerState::Done).len(), 4);
        assert!(run.workers_in(WorkerState::Killed).is_empty());
        assert!(run.deadlock.is_none());
        assert!(run.elapsed > Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_workers_is_rejected() {
        let err = Scenario::ordered(settings().with_workers(0)).run().await.unwrap_err();
        assert_eq!(err.code(), "E800");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_telemetry_has_no_summary() {
        let run = Scenario::ordered(settings().with_telemetry(false))
            .run()
            .await
            .unwrap();
        assert!(run.summary.is_none());
        assert_eq!(run.outcome, ScenarioOutcome::AllCompleted);
    }
}
