//! Deadlock detector
//!
//! The detector is an external observer, optionally with a deadline. It waits
//! for every worker's state to turn terminal; if that has not happened when
//! the deadline expires, it records who was stuck and what they were waiting
//! on, then cancels the scenario's token so every stuck worker is killed and
//! its resources are released. Without a deadline it only reports progress.

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::progress::ProgressReporter;
use crate::domain::resources::{ResourceId, ResourceSet};
use crate::domain::worker::{AcquisitionOrder, WorkerState};

/// A worker as seen by the detector
#[derive(Debug, Clone)]
pub struct WatchedWorker {
    pub name: String,
    /// Acquisition order, when the worker uses the exclusive resources
    pub order: Option<AcquisitionOrder>,
    pub state: watch::Receiver<WorkerState>,
}

impl WatchedWorker {
    pub fn new(
        name: impl Into<String>,
        order: Option<AcquisitionOrder>,
        state: watch::Receiver<WorkerState>,
    ) -> Self {
        Self {
            name: name.into(),
            order,
            state,
        }
    }

    fn current(&self) -> WorkerState {
        *self.state.borrow()
    }
}

/// A worker that had not finished when the deadline expired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckWorker {
    pub name: String,
    pub state: WorkerState,
    /// Resource the worker was blocked on, if any
    pub waiting_on: Option<ResourceId>,
    /// Resources the worker owned at that moment
    pub holding: Vec<ResourceId>,
}

/// `waiter` is blocked on `resource`, which `holder` owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEdge {
    pub waiter: String,
    pub holder: String,
    pub resource: ResourceId,
}

impl fmt::Display for WaitEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (on {})", self.waiter, self.holder, self.resource)
    }
}

/// Wait-for graph over the stuck workers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    edges: Vec<WaitEdge>,
}

impl WaitForGraph {
    /// Build the graph from the stuck workers and the current owners
    pub fn build(stuck: &[StuckWorker], resources: &ResourceSet) -> Self {
        let edges = stuck
            .iter()
            .filter_map(|worker| {
                let resource = worker.waiting_on?;
                let holder = resources.owner(resource)?;
                (holder != worker.name).then(|| WaitEdge {
                    waiter: worker.name.clone(),
                    holder,
                    resource,
                })
            })
            .collect();
        Self { edges }
    }

    pub fn edges(&self) -> &[WaitEdge] {
        &self.edges
    }

    /// One cycle in the graph, as the list of workers on it
    ///
    /// Each worker waits on at most one resource, so every node has at most
    /// one outgoing edge and following edges from any node either ends or
    /// loops.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let next: BTreeMap<&str, &str> = self
            .edges
            .iter()
            .map(|edge| (edge.waiter.as_str(), edge.holder.as_str()))
            .collect();

        for &start in next.keys() {
            let mut path: Vec<&str> = vec![start];
            let mut current = start;
            while let Some(&following) = next.get(current) {
                if let Some(pos) = path.iter().position(|name| *name == following) {
                    return Some(path[pos..].iter().map(|name| name.to_string()).collect());
                }
                path.push(following);
                current = following;
            }
        }
        None
    }
}

/// What the detector saw when it fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockReport {
    /// Deadline that expired
    pub deadline_secs: f64,
    pub stuck: Vec<StuckWorker>,
    pub edges: Vec<WaitEdge>,
    /// Workers on a wait-for cycle, empty when none was found
    pub cycle: Vec<String>,
}

impl DeadlockReport {
    pub fn has_cycle(&self) -> bool {
        !self.cycle.is_empty()
    }

    pub fn stuck_names(&self) -> Vec<&str> {
        self.stuck.iter().map(|w| w.name.as_str()).collect()
    }
}

/// Result of supervising a run
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    AllCompleted,
    Deadlock(DeadlockReport),
}

/// Observer of a run's workers
#[derive(Debug, Clone)]
pub struct DeadlockDetector {
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl DeadlockDetector {
    /// Detector that kills whatever is still running at `deadline`
    pub fn new(deadline: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Some(deadline),
            cancel,
        }
    }

    /// Detector that waits for every worker, however long it takes
    pub fn without_deadline(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Wait for every worker to finish, or kill the stragglers at the deadline
    pub async fn supervise(
        &self,
        workers: &[WatchedWorker],
        resources: Option<&ResourceSet>,
        progress: Option<&dyn ProgressReporter>,
    ) -> Verdict {
        let total = workers.len();
        let mut pending: FuturesUnordered<_> = workers
            .iter()
            .map(|worker| {
                let mut state = worker.state.clone();
                async move {
                    // A closed channel means the worker is gone
                    let _ = state.wait_for(WorkerState::is_terminal).await;
                }
            })
            .collect();

        let all_finished = async {
            let mut completed = 0;
            while pending.next().await.is_some() {
                completed += 1;
                if let Some(progress) = progress {
                    progress.finished(completed, total);
                }
            }
        };

        let Some(deadline) = self.deadline else {
            all_finished.await;
            info!(workers = total, "All workers finished");
            return Verdict::AllCompleted;
        };

        if tokio::time::timeout(deadline, all_finished).await.is_ok() {
            info!(workers = total, "All workers finished before the deadline");
            return Verdict::AllCompleted;
        }

        let report = self.inspect(deadline, workers, resources);
        warn!(
            deadline_ms = deadline.as_millis() as u64,
            stuck = ?report.stuck_names(),
            cycle = ?report.cycle,
            "Deadlock detected; terminating stuck workers"
        );
        for edge in &report.edges {
            warn!(waiter = %edge.waiter, holder = %edge.holder, resource = %edge.resource, "Wait-for edge");
        }

        self.cancel.cancel();
        Verdict::Deadlock(report)
    }

    fn inspect(
        &self,
        deadline: Duration,
        workers: &[WatchedWorker],
        resources: Option<&ResourceSet>,
    ) -> DeadlockReport {
        let owner = |id: ResourceId| resources.and_then(|set| set.owner(id));
        let stuck: Vec<StuckWorker> = workers
            .iter()
            .filter(|worker| !worker.current().is_terminal())
            .map(|worker| {
                let state = worker.current();
                StuckWorker {
                    name: worker.name.clone(),
                    state,
                    waiting_on: worker.order.and_then(|order| state.waiting_on(order)),
                    holding: ResourceId::ALL
                        .into_iter()
                        .filter(|id| owner(*id).as_deref() == Some(worker.name.as_str()))
                        .collect(),
                }
            })
            .collect();

        let graph = resources
            .map(|set| WaitForGraph::build(&stuck, set))
            .unwrap_or_default();
        DeadlockReport {
            deadline_secs: deadline.as_secs_f64(),
            cycle: graph.find_cycle().unwrap_or_default(),
            edges: graph.edges().to_vec(),
            stuck,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scenario::progress::RecordingProgress;

    fn stuck(name: &str, waiting_on: ResourceId) -> StuckWorker {
        StuckWorker {
            name: name.to_string(),
            state: WorkerState::AcquiringSecond,
            waiting_on: Some(waiting_on),
            holding: vec![waiting_on.other()],
        }
    }

    #[tokio::test]
    async fn test_graph_finds_two_worker_cycle() {
        let resources = ResourceSet::new();
        let _a = resources.acquire(ResourceId::A, "P1", None).await.unwrap();
        let _b = resources.acquire(ResourceId::B, "P2", None).await.unwrap();

        let graph = WaitForGraph::build(
            &[stuck("P1", ResourceId::B), stuck("P2", ResourceId::A)],
            &resources,
        );

        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.edges()[0].to_string(), "P1 -> P2 (on B)");
        assert_eq!(graph.find_cycle(), Some(vec!["P1".to_string(), "P2".to_string()]));
    }

    #[tokio::test]
    async fn test_graph_without_cycle() {
        let resources = ResourceSet::new();
        let _a = resources.acquire(ResourceId::A, "P1", None).await.unwrap();

        // P2 waits on P1, who waits on nothing
        let graph = WaitForGraph::build(&[stuck("P2", ResourceId::A)], &resources);

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.find_cycle(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_reports_progress_when_all_finish() {
        let (tx1, rx1) = watch::channel(WorkerState::Start);
        let (tx2, rx2) = watch::channel(WorkerState::Start);
        let workers = vec![
            WatchedWorker::new("P1", Some(AcquisitionOrder::forward()), rx1),
            WatchedWorker::new("P2", Some(AcquisitionOrder::forward()), rx2),
        ];
        let cancel = CancellationToken::new();
        let detector = DeadlockDetector::new(Duration::from_secs(1), cancel.clone());
        let progress = RecordingProgress::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx1.send_replace(WorkerState::Done);
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx2.send_replace(WorkerState::Done);
        });

        let verdict = detector
            .supervise(&workers, None, Some(&progress))
            .await;

        assert_eq!(verdict, Verdict::AllCompleted);
        assert_eq!(progress.calls(), vec![(1, 2), (2, 2)]);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_without_deadline_waits_for_slow_workers() {
        let (tx, rx) = watch::channel(WorkerState::HeldFirst);
        let workers = vec![WatchedWorker::new("P1", Some(AcquisitionOrder::forward()), rx)];
        let cancel = CancellationToken::new();
        let detector = DeadlockDetector::without_deadline(cancel.clone());
        assert_eq!(detector.deadline(), None);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            tx.send_replace(WorkerState::Done);
        });

        let verdict = detector.supervise(&workers, None, None).await;

        assert_eq!(verdict, Verdict::AllCompleted);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_cancels_at_deadline() {
        let resources = ResourceSet::new();
        let _held = resources.acquire(ResourceId::A, "P1", None).await.unwrap();
        let (_tx, rx) = watch::channel(WorkerState::AcquiringSecond);
        let workers = vec![WatchedWorker::new("P1", Some(AcquisitionOrder::forward()), rx)];
        let cancel = CancellationToken::new();
        let detector = DeadlockDetector::new(Duration::from_millis(500), cancel.clone());

        let verdict = detector.supervise(&workers, Some(&resources), None).await;

        let Verdict::Deadlock(report) = verdict else {
            panic!("expected a deadlock verdict");
        };
        assert!(cancel.is_cancelled());
        assert_eq!(report.stuck_names(), vec!["P1"]);
        assert_eq!(report.stuck[0].waiting_on, Some(ResourceId::B));
        assert_eq!(report.stuck[0].holding, vec![ResourceId::A]);
        assert!(!report.has_cycle());
    }
}
