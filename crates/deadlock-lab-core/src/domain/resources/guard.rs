//! RAII guards for held resources
//!
//! A guard is the only way to hold a resource, so a release can only ever
//! come from the holder. Dropping the guard (normal completion, early return,
//! or a cancelled worker future) clears the owner slot and unlocks.

use super::set::Resource;
use super::types::{ResourceId, ResourceResult};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, error};

/// Exclusive hold on one resource
#[derive(Debug)]
pub struct ResourceGuard {
    /// Resource being held
    resource: Arc<Resource>,

    /// Name of the holding worker
    holder: String,

    /// Lock permit; `None` once released
    permit: Option<OwnedMutexGuard<()>>,

    /// When the hold started
    acquired_at: Instant,
}

impl ResourceGuard {
    pub(crate) fn new(resource: Arc<Resource>, holder: String, permit: OwnedMutexGuard<()>) -> Self {
        Self {
            resource,
            holder,
            permit: Some(permit),
            acquired_at: Instant::now(),
        }
    }

    /// Which resource is held
    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Name of the holder
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// How long the resource has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Explicitly release the resource (normally done automatically on drop)
    pub fn release(mut self) -> ResourceResult<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> ResourceResult<()> {
        let Some(permit) = self.permit.take() else {
            return Ok(());
        };
        // Owner is cleared while still locked so the next holder finds it empty.
        let vacated = self.resource.vacate(&self.holder);
        drop(permit);
        debug!(
            resource = %self.resource.id(),
            worker = %self.holder,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Resource released"
        );
        vacated
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Err(err) = self.do_release() {
            error!(code = err.code(), error = %err, "Resource release failed");
        }
    }
}

impl fmt::Display for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource[{}] held by {}", self.resource.id(), self.holder)
    }
}
