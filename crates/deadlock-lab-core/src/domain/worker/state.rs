//! Worker states, policies and acquisition orders

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::resources::ResourceId;

/// Lifecycle state of a worker
///
/// ```text
/// Start -> AcquiringFirst -> HeldFirst -> AcquiringSecond -> HeldBoth -> Releasing -> Done
///                 ^                              | (timeout, retry policy only)
///                 +--- Backoff <- ReleasingFirst +
/// ```
///
/// `Killed` is imposed from outside and reachable from every non-terminal
/// state; `Failed` marks an infrastructure fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Start,
    AcquiringFirst,
    HeldFirst,
    AcquiringSecond,
    HeldBoth,
    Releasing,
    ReleasingFirst,
    Backoff,
    Done,
    Killed,
    Failed,
}

impl WorkerState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Killed | Self::Failed)
    }

    /// Which resource this state is blocked on, given the worker's order
    pub fn waiting_on(&self, order: AcquisitionOrder) -> Option<ResourceId> {
        match self {
            Self::AcquiringFirst => Some(order.first),
            Self::AcquiringSecond => Some(order.second),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AcquiringFirst => "acquiring_first",
            Self::HeldFirst => "held_first",
            Self::AcquiringSecond => "acquiring_second",
            Self::HeldBoth => "held_both",
            Self::Releasing => "releasing",
            Self::ReleasingFirst => "releasing_first",
            Self::Backoff => "backoff",
            Self::Done => "done",
            Self::Killed => "killed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a worker ended, as reported in metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ok,
    Killed,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Killed => "killed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<WorkerState> for WorkerStatus {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Done => Self::Ok,
            WorkerState::Failed => Self::Error,
            _ => Self::Killed,
        }
    }
}

/// Acquisition policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Blocking acquisition in the assigned order; deadlocks on reversed orders
    Naive,
    /// Blocking acquisition in the global order, whatever was assigned
    Ordered,
    /// Blocking first acquisition, timed second acquisition with backoff
    Retry,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Ordered => "ordered",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order in which a worker requests the two resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcquisitionOrder {
    pub first: ResourceId,
    pub second: ResourceId,
}

impl AcquisitionOrder {
    /// A -> B, the global order
    pub fn forward() -> Self {
        Self {
            first: ResourceId::A,
            second: ResourceId::B,
        }
    }

    /// B -> A
    pub fn reversed() -> Self {
        Self {
            first: ResourceId::B,
            second: ResourceId::A,
        }
    }

    /// Even workers go forward, odd workers go reversed
    pub fn split(index: usize) -> Self {
        if index % 2 == 0 {
            Self::forward()
        } else {
            Self::reversed()
        }
    }

    /// The same pair sorted into global order
    pub fn normalized(self) -> Self {
        if self.first.priority() <= self.second.priority() {
            self
        } else {
            Self {
                first: self.second,
                second: self.first,
            }
        }
    }

    /// Whether this follows the global order
    pub fn is_global(&self) -> bool {
        self.first.priority() < self.second.priority()
    }
}

impl fmt::Display for AcquisitionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WorkerState::Done.is_terminal());
        assert!(WorkerState::Killed.is_terminal());
        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::AcquiringSecond.is_terminal());
        assert!(!WorkerState::Backoff.is_terminal());
    }

    #[test]
    fn test_waiting_on_follows_order() {
        let order = AcquisitionOrder::reversed();
        assert_eq!(WorkerState::AcquiringFirst.waiting_on(order), Some(ResourceId::B));
        assert_eq!(WorkerState::AcquiringSecond.waiting_on(order), Some(ResourceId::A));
        assert_eq!(WorkerState::HeldBoth.waiting_on(order), None);
    }

    #[test]
    fn test_split_orders() {
        assert_eq!(AcquisitionOrder::split(0), AcquisitionOrder::forward());
        assert_eq!(AcquisitionOrder::split(1), AcquisitionOrder::reversed());
        assert_eq!(AcquisitionOrder::split(4), AcquisitionOrder::forward());
    }

    #[test]
    fn test_normalized_is_global() {
        assert_eq!(AcquisitionOrder::reversed().normalized(), AcquisitionOrder::forward());
        assert!(AcquisitionOrder::forward().normalized().is_global());
        assert!(!AcquisitionOrder::reversed().is_global());
        assert_eq!(AcquisitionOrder::reversed().to_string(), "B -> A");
    }

    #[test]
    fn test_status_from_state() {
        assert_eq!(WorkerStatus::from(WorkerState::Done), WorkerStatus::Ok);
        assert_eq!(WorkerStatus::from(WorkerState::Killed), WorkerStatus::Killed);
        assert_eq!(WorkerStatus::from(WorkerState::Failed), WorkerStatus::Error);
        assert_eq!(WorkerStatus::Killed.to_string(), "killed");
    }
}
