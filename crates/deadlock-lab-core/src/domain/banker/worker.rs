//! Worker that negotiates its claim with the banker

use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::algorithm::{Banker, Units};
use crate::domain::metrics::event::{millis, secs};
use crate::domain::metrics::{MetricEventKind, MetricsSink};
use crate::domain::resources::ResourceId;
use crate::domain::worker::backoff::{Backoff, worker_rng};
use crate::domain::worker::{WorkerExit, WorkerState, WorkerStatus};
use crate::error::Result;

/// Shortest pause after a denied request
const MIN_DENIAL_WAIT: Duration = Duration::from_millis(200);

/// A participant that only acquires what the banker deems safe
#[derive(Debug)]
pub struct BankerWorker {
    id: usize,
    name: String,
    claim: Units,
    banker: Arc<Banker>,
    hold_time: Duration,
    denial_backoff: Backoff,
    metrics: MetricsSink,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
    rng: StdRng,
    retries: u32,
    waited: Duration,
}

impl BankerWorker {
    pub fn new(
        id: usize,
        claim: Units,
        banker: Arc<Banker>,
        hold_time: Duration,
        metrics: MetricsSink,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let name = format!("P{}", id + 1);
        let (state, state_rx) = watch::channel(WorkerState::Start);
        let worker = Self {
            id,
            rng: worker_rng(&name),
            name,
            claim,
            banker,
            hold_time,
            denial_backoff: Backoff::fixed((hold_time / 2).max(MIN_DENIAL_WAIT), hold_time / 2),
            metrics,
            cancel,
            state,
            retries: 0,
            waited: Duration::ZERO,
        };
        (worker, state_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Negotiate the full claim, work, release
    pub async fn run(mut self) -> WorkerExit {
        let started = Instant::now();
        self.emit(MetricEventKind::Started);
        info!(worker = %self.name, claim = %self.claim, "Banker worker started");

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.drive() => Some(result),
        };

        // Units have no guard; hand back whatever is still allocated
        match self.banker.release_all(self.id) {
            Ok(released) => self.emit_released(released),
            Err(err) => {
                error!(worker = %self.name, error = %err, "Failed to return units to the banker");
            }
        }

        let state = match &result {
            Some(Ok(())) => {
                info!(worker = %self.name, retries = self.retries, "Banker worker finished");
                WorkerState::Done
            }
            None => {
                warn!(worker = %self.name, "Banker worker killed");
                WorkerState::Killed
            }
            Some(Err(err)) => {
                error!(worker = %self.name, code = err.code(), error = %err, "Banker worker failed");
                WorkerState::Failed
            }
        };
        self.transition(state);

        let duration = started.elapsed();
        self.emit(MetricEventKind::Finished {
            status: WorkerStatus::from(state),
            duration_secs: secs(duration),
            wait_secs: secs(self.waited),
            retries: self.retries,
        });

        WorkerExit {
            id: self.id,
            name: self.name.clone(),
            state,
            retries: self.retries,
            duration,
            wait_time: self.waited,
            error: None,
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut remaining = self.claim;
        self.transition(WorkerState::AcquiringFirst);

        while !remaining.is_zero() {
            let request = self.build_request(remaining);
            let decision = self.banker.request(self.id, request)?;

            if decision.is_granted() {
                remaining = remaining.saturating_minus(request);
                for resource in ResourceId::ALL {
                    if request.get(resource) > 0 {
                        self.emit(MetricEventKind::Acquired {
                            resource,
                            waited_ms: 0,
                        });
                    }
                }
                info!(worker = %self.name, request = %request, remaining = %remaining, "Request granted");
                if !remaining.is_zero() {
                    self.transition(WorkerState::HeldFirst);
                    tokio::time::sleep(self.hold_time / 3).await;
                    self.transition(WorkerState::AcquiringFirst);
                }
                continue;
            }

            self.retries += 1;
            let pause = self.denial_backoff.delay(self.retries, &mut self.rng);
            self.emit(MetricEventKind::Retry {
                retries: self.retries,
                backoff_ms: millis(pause),
            });
            debug!(worker = %self.name, request = %request, decision = %decision, backoff_ms = millis(pause), "Request denied");

            self.transition(WorkerState::Backoff);
            tokio::time::sleep(pause).await;
            self.waited += pause;
            self.transition(WorkerState::AcquiringFirst);
        }

        self.transition(WorkerState::HeldBoth);
        tokio::time::sleep(self.hold_time).await;

        self.transition(WorkerState::Releasing);
        let released = self.banker.release_all(self.id)?;
        self.emit_released(released);
        debug!(worker = %self.name, released = %released, "Claim returned");
        Ok(())
    }

    fn emit_released(&self, released: Units) {
        for resource in ResourceId::ALL {
            if released.get(resource) > 0 {
                self.emit(MetricEventKind::Released { resource });
            }
        }
    }

    /// Random partial request of the remaining need
    fn build_request(&mut self, remaining: Units) -> Units {
        let mut pick = |need: u32| {
            if need == 0 {
                0
            } else {
                self.rng.gen_range(1..=need)
            }
        };
        Units::new(pick(remaining.a), pick(remaining.b))
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        debug!(worker = %self.name, from = %previous, to = %next, "State transition");
    }

    fn emit(&self, kind: MetricEventKind) {
        self.metrics.emit(self.id, &self.name, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::MetricsCollector;

    #[tokio::test(start_paused = true)]
    async fn test_lone_worker_gets_full_claim() {
        let banker = Arc::new(Banker::new(Units::splat(2), vec![Units::new(2, 1)]).unwrap());
        let collector = MetricsCollector::start(true);
        let (worker, state) = BankerWorker::new(
            0,
            Units::new(2, 1),
            banker.clone(),
            Duration::from_millis(90),
            collector.sink(),
            CancellationToken::new(),
        );
        assert_eq!(worker.name(), "P1");

        let exit = worker.run().await;

        assert_eq!(exit.state, WorkerState::Done);
        assert_eq!(*state.borrow(), WorkerState::Done);
        assert_eq!(exit.retries, 0);
        assert!(banker.is_idle());

        let events = collector.drain().await.unwrap().unwrap();
        assert_eq!(events.first().map(|e| e.kind.as_str()), Some("started"));
        assert_eq!(events.last().map(|e| e.kind.as_str()), Some("finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_worker_retries_until_units_return() {
        let banker = Arc::new(Banker::new(Units::splat(2), vec![Units::new(2, 0), Units::new(1, 0)]).unwrap());
        // P1 takes all of A up front
        assert!(banker.request(0, Units::new(2, 0)).unwrap().is_granted());

        let (worker, _state) = BankerWorker::new(
            1,
            Units::new(1, 0),
            banker.clone(),
            Duration::from_millis(100),
            MetricsSink::Disabled,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(700)).await;
        banker.release_all(0).unwrap();

        let exit = handle.await.unwrap();
        assert_eq!(exit.state, WorkerState::Done);
        assert!(exit.retries >= 2);
        assert!(exit.wait_time >= Duration::from_millis(400));
        assert!(banker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_units() {
        let banker = Arc::new(Banker::new(Units::splat(2), vec![Units::splat(2)]).unwrap());
        let collector = MetricsCollector::start(true);
        let cancel = CancellationToken::new();
        let (worker, mut state) = BankerWorker::new(
            0,
            Units::splat(2),
            banker.clone(),
            Duration::from_secs(10),
            collector.sink(),
            cancel.clone(),
        );
        let handle = tokio::spawn(worker.run());

        state.wait_for(|s| *s == WorkerState::HeldBoth).await.unwrap();
        assert!(!banker.is_idle());

        cancel.cancel();
        let exit = handle.await.unwrap();
        assert_eq!(exit.state, WorkerState::Killed);
        assert!(banker.is_idle());

        // Returned units show up as releases before the final record
        let events = collector.drain().await.unwrap().unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds[kinds.len() - 3..], ["released", "released", "finished"]);
        assert_eq!(kinds.iter().filter(|k| **k == "released").count(), 2);
    }
}
