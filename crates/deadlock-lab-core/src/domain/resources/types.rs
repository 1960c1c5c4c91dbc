//! Resource identities, snapshots and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for resource operations
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// Resource errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A timed acquisition gave up
    #[error("Acquisition timeout: resource '{resource}' still held by {holder} after {waited:?}")]
    Timeout {
        resource: String,
        holder: String,
        waited: Duration,
    },

    /// The owner slot was occupied when the lock was granted
    #[error("Ownership violation: resource '{resource}' held by {holder} was granted to {claimant}")]
    OwnershipViolation {
        resource: String,
        holder: String,
        claimant: String,
    },

    /// Release attempted by a worker that does not own the resource
    #[error("Release by non-holder: resource '{resource}' is not held by {claimant}")]
    NotHeld { resource: String, claimant: String },
}

impl ResourceError {
    /// Get error code for this resource error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E100",
            Self::OwnershipViolation { .. } => "E101",
            Self::NotHeld { .. } => "E102",
        }
    }

    /// Whether this is the recoverable timeout signal
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// One of the two exclusive resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceId {
    A,
    B,
}

impl ResourceId {
    /// Both resources, in global acquisition order
    pub const ALL: [ResourceId; 2] = [ResourceId::A, ResourceId::B];

    /// Position in the global acquisition order (lower = acquired first)
    pub fn priority(&self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// The other resource
    pub fn other(&self) -> ResourceId {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of one resource, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    /// Current owner, if held
    pub owner: Option<String>,
    /// Whether the underlying mutex is locked
    pub locked: bool,
    /// Successful acquisitions since creation
    pub acquisitions: u64,
    /// Owner-slot inconsistencies observed since creation
    pub violations: u64,
}

impl ResourceSnapshot {
    /// Neither owned nor locked
    pub fn is_free(&self) -> bool {
        self.owner.is_none() && !self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_order() {
        assert!(ResourceId::A.priority() < ResourceId::B.priority());
        let mut ids = [ResourceId::B, ResourceId::A];
        ids.sort_by_key(|id| id.priority());
        assert_eq!(ids, ResourceId::ALL);
    }

    #[test]
    fn test_other() {
        assert_eq!(ResourceId::A.other(), ResourceId::B);
        assert_eq!(ResourceId::B.other(), ResourceId::A);
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceId::A.to_string(), "A");
        assert_eq!(ResourceId::B.to_string(), "B");
    }

    #[test]
    fn test_error_codes() {
        let timeout = ResourceError::Timeout {
            resource: "A".to_string(),
            holder: "P2".to_string(),
            waited: Duration::from_millis(500),
        };
        assert_eq!(timeout.code(), "E100");
        assert!(timeout.is_timeout());

        let not_held = ResourceError::NotHeld {
            resource: "B".to_string(),
            claimant: "P1".to_string(),
        };
        assert_eq!(not_held.code(), "E102");
        assert!(!not_held.is_timeout());
    }
}
