//! Many-producer / one-consumer metric collection
//!
//! Whether telemetry is available is decided once, when the collector is
//! created. A disabled collector hands out sinks that drop every event, so
//! workers never check for telemetry themselves.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::event::{MetricEvent, MetricEventKind};
use super::summary::{ScenarioSummary, SummaryContext};
use crate::error::Result;

/// Environment variable that forces telemetry off
pub const DISABLE_TELEMETRY_ENV: &str = "DEADLOCK_LAB_DISABLE_TELEMETRY";

/// Write end handed to each worker
#[derive(Debug, Clone)]
pub enum MetricsSink {
    Active(mpsc::UnboundedSender<MetricEvent>),
    Disabled,
}

impl MetricsSink {
    /// Emit one event; a closed conduit is ignored
    pub fn emit(&self, worker_id: usize, worker: &str, kind: MetricEventKind) {
        if let Self::Active(tx) = self {
            let _ = tx.send(MetricEvent::new(worker_id, worker, kind));
        }
    }

    /// Whether events go anywhere
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// Scenario-wide metrics collector
#[derive(Debug)]
pub enum MetricsCollector {
    Active {
        tx: mpsc::UnboundedSender<MetricEvent>,
        task: JoinHandle<Vec<MetricEvent>>,
    },
    Disabled {
        reason: String,
    },
}

impl MetricsCollector {
    /// Start a collector, degrading to `Disabled` when telemetry is off or
    /// the conduit cannot be set up in this environment
    pub fn start(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled("telemetry turned off in configuration");
        }
        if std::env::var(DISABLE_TELEMETRY_ENV).is_ok_and(|v| v != "0" && !v.is_empty()) {
            return Self::disabled(format!("{} is set", DISABLE_TELEMETRY_ENV));
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Self::disabled("no async runtime available for the metrics conduit");
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<MetricEvent>();
        let task = runtime.spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                debug!(worker = %event.worker, kind = event.kind.as_str(), "Metric event");
                events.push(event);
            }
            events
        });

        Self::Active { tx, task }
    }

    /// A collector that records nothing
    pub fn disabled(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(reason = %reason, "Telemetry disabled; summaries will be absent");
        Self::Disabled { reason }
    }

    /// A sink for one worker
    pub fn sink(&self) -> MetricsSink {
        match self {
            Self::Active { tx, .. } => MetricsSink::Active(tx.clone()),
            Self::Disabled { .. } => MetricsSink::Disabled,
        }
    }

    /// Whether events are being recorded
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Why telemetry is disabled, if it is
    pub fn disabled_reason(&self) -> Option<&str> {
        match self {
            Self::Active { .. } => None,
            Self::Disabled { reason } => Some(reason),
        }
    }

    /// Close the conduit and drain it into the collected events
    ///
    /// Every worker sink must already be dropped, otherwise this waits for
    /// them.
    pub async fn drain(self) -> Result<Option<Vec<MetricEvent>>> {
        match self {
            Self::Active { tx, task } => {
                drop(tx);
                Ok(Some(task.await?))
            }
            Self::Disabled { .. } => Ok(None),
        }
    }

    /// Close the conduit and build the scenario summary
    pub async fn finish(self, context: SummaryContext) -> Result<Option<ScenarioSummary>> {
        Ok(self
            .drain()
            .await?
            .map(|events| ScenarioSummary::from_events(context, &events)))
    }
}
