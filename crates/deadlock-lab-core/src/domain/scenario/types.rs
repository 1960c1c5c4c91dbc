//! Scenario kinds, selectors, settings and outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::worker::{AcquisitionOrder, Policy, WorkerTiming};
use crate::error::Error;

/// Final outcome of a scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioOutcome {
    /// Every worker reached `Done` before the deadline
    AllCompleted,
    /// The detector fired and killed the stuck workers
    DeadlockDetected,
}

impl ScenarioOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllCompleted => "AllCompleted",
            Self::DeadlockDetected => "DeadlockDetected",
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The concrete scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Naive workers with reversed orders
    Deadlock,
    /// Ordered workers with a uniform order
    Ordered,
    /// Retry workers with reversed orders
    Retry,
    /// Banker's-algorithm avoidance over counted resources
    Banker,
}

impl ScenarioKind {
    /// Scenarios run by `todos`, in order
    pub const STANDARD: [ScenarioKind; 3] =
        [ScenarioKind::Deadlock, ScenarioKind::Ordered, ScenarioKind::Retry];

    /// Short tag, as accepted on the command line
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Deadlock => "deadlock",
            Self::Ordered => "ordenado",
            Self::Retry => "retry",
            Self::Banker => "banker",
        }
    }

    /// Display title
    pub fn title(&self) -> &'static str {
        match self {
            Self::Deadlock => "Scenario 1: intentional deadlock",
            Self::Ordered => "Scenario 2: prevention with a fixed acquisition order",
            Self::Retry => "Scenario 3: recovery with timeout + backoff",
            Self::Banker => "Scenario 4: avoidance with the banker's algorithm",
        }
    }

    /// Closing remark for a run that ended with `outcome`
    pub fn remark(&self, outcome: ScenarioOutcome) -> &'static str {
        match (self, outcome) {
            (Self::Deadlock, ScenarioOutcome::DeadlockDetected) => {
                "Stuck workers were terminated so the run could not hang."
            }
            (Self::Deadlock, ScenarioOutcome::AllCompleted) => {
                "Surprising! They finished (the environment may be very fast)."
            }
            (Self::Ordered, ScenarioOutcome::AllCompleted) => {
                "Every worker followed the same order (A -> B) and finished without deadlock."
            }
            (Self::Retry, ScenarioOutcome::AllCompleted) => {
                "Timeouts avoided the deadlock even with reversed orders."
            }
            (Self::Banker, ScenarioOutcome::AllCompleted) => {
                "The banker only granted safe states; no deadlock occurred."
            }
            (Self::Ordered | Self::Retry | Self::Banker, ScenarioOutcome::DeadlockDetected) => {
                "Unexpected: workers were stuck even though this policy rules out deadlock."
            }
        }
    }

    /// Whether the detector kills workers that outlive the deadline
    ///
    /// Only the naive workers can form a wait-for cycle. The other policies
    /// always finish, so their runs are waited on without a deadline.
    pub fn has_deadline(&self) -> bool {
        matches!(self, Self::Deadlock)
    }

    /// Policy of the two-lock workers; `None` for the banker scenario
    pub fn policy(&self) -> Option<Policy> {
        match self {
            Self::Deadlock => Some(Policy::Naive),
            Self::Ordered => Some(Policy::Ordered),
            Self::Retry => Some(Policy::Retry),
            Self::Banker => None,
        }
    }

    /// Order assigned to worker `index`
    pub fn order_for(&self, index: usize) -> AcquisitionOrder {
        match self {
            Self::Deadlock | Self::Retry => AcquisitionOrder::split(index),
            Self::Ordered | Self::Banker => AcquisitionOrder::forward(),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for ScenarioKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deadlock" => Ok(Self::Deadlock),
            "ordenado" | "ordered" => Ok(Self::Ordered),
            "retry" => Ok(Self::Retry),
            "banker" | "banqueiro" => Ok(Self::Banker),
            other => Err(Error::UnknownScenario(other.to_string())),
        }
    }
}

/// Which scenarios to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenarioSelector {
    /// The three standard scenarios in sequence
    #[default]
    All,
    Single(ScenarioKind),
}

impl ScenarioSelector {
    /// Scenarios to run, in order
    pub fn kinds(&self) -> Vec<ScenarioKind> {
        match self {
            Self::All => ScenarioKind::STANDARD.to_vec(),
            Self::Single(kind) => vec![*kind],
        }
    }
}

impl FromStr for ScenarioSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todos" | "all" => Ok(Self::All),
            other => other.parse().map(Self::Single),
        }
    }
}

/// Explicit per-run settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioSettings {
    /// Number of workers to spawn
    pub workers: usize,
    pub timing: WorkerTiming,
    /// How long the detector waits before declaring deadlock
    pub deadlock_timeout: Duration,
    /// Whether to collect metric events
    pub telemetry: bool,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            timing: WorkerTiming::new(Duration::from_millis(800), Duration::from_secs(1)),
            deadlock_timeout: Duration::from_secs(5),
            telemetry: true,
        }
    }
}

impl ScenarioSettings {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timing(mut self, timing: WorkerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("deadlock".parse::<ScenarioKind>().unwrap(), ScenarioKind::Deadlock);
        assert_eq!("ordenado".parse::<ScenarioKind>().unwrap(), ScenarioKind::Ordered);
        assert_eq!("Ordered".parse::<ScenarioKind>().unwrap(), ScenarioKind::Ordered);
        assert_eq!("retry".parse::<ScenarioKind>().unwrap(), ScenarioKind::Retry);
        assert_eq!("banker".parse::<ScenarioKind>().unwrap(), ScenarioKind::Banker);

        let err = "livelock".parse::<ScenarioKind>().unwrap_err();
        assert_eq!(err.code(), "E200");
    }

    #[test]
    fn test_selector_all_runs_standard_three() {
        let selector: ScenarioSelector = "todos".parse().unwrap();
        assert_eq!(
            selector.kinds(),
            vec![ScenarioKind::Deadlock, ScenarioKind::Ordered, ScenarioKind::Retry]
        );
        assert_eq!("all".parse::<ScenarioSelector>().unwrap(), ScenarioSelector::All);
        assert_eq!(
            "retry".parse::<ScenarioSelector>().unwrap().kinds(),
            vec![ScenarioKind::Retry]
        );
    }

    #[test]
    fn test_orders_per_kind() {
        assert_eq!(ScenarioKind::Deadlock.order_for(1), AcquisitionOrder::reversed());
        assert_eq!(ScenarioKind::Retry.order_for(2), AcquisitionOrder::forward());
        assert_eq!(ScenarioKind::Ordered.order_for(1), AcquisitionOrder::forward());
    }

    #[test]
    fn test_policies_per_kind() {
        assert_eq!(ScenarioKind::Deadlock.policy(), Some(Policy::Naive));
        assert_eq!(ScenarioKind::Ordered.policy(), Some(Policy::Ordered));
        assert_eq!(ScenarioKind::Retry.policy(), Some(Policy::Retry));
        assert_eq!(ScenarioKind::Banker.policy(), None);
    }

    #[test]
    fn test_only_deadlock_scenario_has_deadline() {
        assert!(ScenarioKind::Deadlock.has_deadline());
        assert!(!ScenarioKind::Ordered.has_deadline());
        assert!(!ScenarioKind::Retry.has_deadline());
        assert!(!ScenarioKind::Banker.has_deadline());
    }

    #[test]
    fn test_remark_follows_outcome() {
        for kind in [ScenarioKind::Ordered, ScenarioKind::Retry, ScenarioKind::Banker] {
            let ok = kind.remark(ScenarioOutcome::AllCompleted);
            let stuck = kind.remark(ScenarioOutcome::DeadlockDetected);
            assert_ne!(ok, stuck);
            assert!(!stuck.contains("without deadlock"));
            assert!(!stuck.contains("no deadlock occurred"));
        }
        assert!(ScenarioKind::Deadlock
            .remark(ScenarioOutcome::DeadlockDetected)
            .contains("terminated"));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(ScenarioOutcome::DeadlockDetected.to_string(), "DeadlockDetected");
        assert_eq!(
            serde_json::to_value(ScenarioOutcome::AllCompleted).unwrap(),
            "AllCompleted"
        );
    }
}
