//! The two-lock worker
//!
//! One `Worker` drives one participant through its policy against the
//! shared `ResourceSet`. Every await inside the policy is a cancellation
//! checkpoint: the whole policy future races the scenario's
//! `CancellationToken`, and dropping it on cancellation drops any held
//! `ResourceGuard`, which releases the resource.

use rand::rngs::StdRng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, worker_rng};
use super::state::{AcquisitionOrder, Policy, WorkerState, WorkerStatus};
use crate::domain::metrics::event::{millis, secs};
use crate::domain::metrics::{MetricEventKind, MetricsSink};
use crate::domain::resources::{ResourceError, ResourceGuard, ResourceId, ResourceSet};

/// Identity and behaviour of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Index within the scenario
    pub id: usize,
    /// Display name (e.g. "P1")
    pub name: String,
    /// Order as assigned by the scenario
    pub order: AcquisitionOrder,
    pub policy: Policy,
}

impl WorkerSpec {
    /// Spec named `P{id + 1}`
    pub fn new(id: usize, order: AcquisitionOrder, policy: Policy) -> Self {
        Self {
            id,
            name: format!("P{}", id + 1),
            order,
            policy,
        }
    }

    /// The order the worker actually follows
    ///
    /// Ordered workers always use the global order.
    pub fn effective_order(&self) -> AcquisitionOrder {
        match self.policy {
            Policy::Ordered => self.order.normalized(),
            Policy::Naive | Policy::Retry => self.order,
        }
    }
}

/// Timing parameters shared by the workers of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTiming {
    /// How long each resource is held before moving on
    pub hold_time: Duration,
    /// Limit on the second acquisition of the retry policy
    pub retry_timeout: Duration,
    pub backoff: Backoff,
}

impl WorkerTiming {
    pub fn new(hold_time: Duration, retry_timeout: Duration) -> Self {
        Self {
            hold_time,
            retry_timeout,
            backoff: Backoff::for_hold_time(hold_time),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What a worker left behind
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerExit {
    pub id: usize,
    pub name: String,
    pub state: WorkerState,
    pub retries: u32,
    pub duration: Duration,
    pub wait_time: Duration,
    /// Fault that ended the worker, when `state` is `Failed`
    pub error: Option<ResourceError>,
}

/// A running participant
#[derive(Debug)]
pub struct Worker {
    spec: WorkerSpec,
    order: AcquisitionOrder,
    timing: WorkerTiming,
    resources: ResourceSet,
    metrics: MetricsSink,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
    rng: StdRng,
    retries: u32,
    waited: Duration,
    waiting_since: Option<Instant>,
    /// Resources currently guarded, in acquisition order
    held: Vec<ResourceId>,
}

impl Worker {
    /// Create a worker and a receiver that follows its state
    pub fn new(
        spec: WorkerSpec,
        timing: WorkerTiming,
        resources: ResourceSet,
        metrics: MetricsSink,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Start);
        let worker = Self {
            order: spec.effective_order(),
            rng: worker_rng(&spec.name),
            spec,
            timing,
            resources,
            metrics,
            cancel,
            state,
            retries: 0,
            waited: Duration::ZERO,
            waiting_since: None,
            held: Vec::new(),
        };
        (worker, state_rx)
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Run the policy to a terminal state
    pub async fn run(mut self) -> WorkerExit {
        let started = Instant::now();
        self.emit(MetricEventKind::Started);
        info!(worker = %self.spec.name, policy = %self.spec.policy, order = %self.order, "Worker started");

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.drive() => Some(result),
        };

        // A kill can land mid-wait; count the partial wait.
        if let Some(since) = self.waiting_since.take() {
            self.waited += since.elapsed();
        }

        let (state, error) = match result {
            Some(Ok(())) => {
                info!(worker = %self.spec.name, retries = self.retries, "Worker finished");
                (WorkerState::Done, None)
            }
            None => {
                warn!(worker = %self.spec.name, from = %*self.state.borrow(), "Worker killed");
                // The dropped policy future has already released these guards
                for resource in std::mem::take(&mut self.held).into_iter().rev() {
                    debug!(worker = %self.spec.name, resource = %resource, "Resource released on kill");
                    self.emit(MetricEventKind::Released { resource });
                }
                (WorkerState::Killed, None)
            }
            Some(Err(err)) => {
                error!(worker = %self.spec.name, code = err.code(), error = %err, "Worker failed");
                (WorkerState::Failed, Some(err))
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
            id: self.spec.id,
            name: self.spec.name.clone(),
            state,
            retries: self.retries,
            duration,
            wait_time: self.waited,
            error,
        }
    }

    async fn drive(&mut self) -> Result<(), ResourceError> {
        match self.spec.policy {
            Policy::Naive | Policy::Ordered => self.run_blocking().await,
            Policy::Retry => self.run_with_retry().await,
        }
    }

    /// Naive and ordered policies: both acquisitions block indefinitely
    async fn run_blocking(&mut self) -> Result<(), ResourceError> {
        let order = self.order;

        self.transition(WorkerState::AcquiringFirst);
        let first = self.acquire(order.first, None).await?;
        self.transition(WorkerState::HeldFirst);
        self.hold().await;

        self.transition(WorkerState::AcquiringSecond);
        let second = self.acquire(order.second, None).await?;
        self.finish_with_both(first, second).await
    }

    /// Retry policy: give up the first resource when the second times out
    async fn run_with_retry(&mut self) -> Result<(), ResourceError> {
        let order = self.order;
        let limit = self.timing.retry_timeout;

        loop {
            self.transition(WorkerState::AcquiringFirst);
            let first = self.acquire(order.first, None).await?;
            self.transition(WorkerState::HeldFirst);
            self.hold().await;

            self.transition(WorkerState::AcquiringSecond);
            match self.acquire(order.second, Some(limit)).await {
                Ok(second) => return self.finish_with_both(first, second).await,
                Err(err) if err.is_timeout() => {
                    self.transition(WorkerState::ReleasingFirst);
                    self.release(first)?;

                    self.retries += 1;
                    let pause = self.timing.backoff.delay(self.retries, &mut self.rng);
                    self.emit(MetricEventKind::Retry {
                        retries: self.retries,
                        backoff_ms: millis(pause),
                    });
                    warn!(
                        worker = %self.spec.name,
                        resource = %order.second,
                        retries = self.retries,
                        backoff_ms = millis(pause),
                        "Timed out waiting for second resource; backing off"
                    );

                    self.transition(WorkerState::Backoff);
                    tokio::time::sleep(pause).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn finish_with_both(
        &mut self,
        first: ResourceGuard,
        second: ResourceGuard,
    ) -> Result<(), ResourceError> {
        self.transition(WorkerState::HeldBoth);
        self.hold().await;

        // Reverse acquisition order
        self.transition(WorkerState::Releasing);
        self.release(second)?;
        self.release(first)?;
        Ok(())
    }

    async fn acquire(
        &mut self,
        resource: ResourceId,
        timeout: Option<Duration>,
    ) -> Result<ResourceGuard, ResourceError> {
        let since = Instant::now();
        self.waiting_since = Some(since);
        let result = self.resources.acquire(resource, &self.spec.name, timeout).await;
        self.waiting_since = None;

        let waited = since.elapsed();
        self.waited += waited;

        match &result {
            Ok(_) => {
                self.held.push(resource);
                info!(worker = %self.spec.name, resource = %resource, waited_ms = millis(waited), "Resource acquired");
                self.emit(MetricEventKind::Acquired {
                    resource,
                    waited_ms: millis(waited),
                });
            }
            Err(err) if err.is_timeout() => {
                self.emit(MetricEventKind::TimedOut {
                    resource,
                    waited_ms: millis(waited),
                });
            }
            Err(_) => {}
        }
        result
    }

    fn release(&mut self, guard: ResourceGuard) -> Result<(), ResourceError> {
        let resource = guard.id();
        self.held.retain(|id| *id != resource);
        self.resources.release(guard)?;
        debug!(worker = %self.spec.name, resource = %resource, "Resource released");
        self.emit(MetricEventKind::Released { resource });
        Ok(())
    }

    async fn hold(&self) {
        tokio::time::sleep(self.timing.hold_time).await;
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        debug!(worker = %self.spec.name, from = %previous, to = %next, "State transition");
    }

    fn emit(&self, kind: MetricEventKind) {
        self.metrics.emit(self.spec.id, &self.spec.name, kind);
    }
}
