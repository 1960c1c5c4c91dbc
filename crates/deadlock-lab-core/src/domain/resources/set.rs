//! The pair of exclusive resources shared by a scenario's workers
//!
//! Mutual exclusion comes from the mutex inside each resource, never from
//! worker discipline. The owner slot is bookkeeping layered on top: it is
//! filled after the mutex is granted and cleared before it is unlocked, and
//! any disagreement between the two is counted as a violation.

use super::guard::ResourceGuard;
use super::types::{ResourceError, ResourceId, ResourceResult, ResourceSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One exclusive resource
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    lock: Arc<Mutex<()>>,
    owner: StdMutex<Option<String>>,
    acquisitions: AtomicU64,
    violations: AtomicU64,
}

impl Resource {
    fn new(id: ResourceId) -> Self {
        Self {
            id,
            lock: Arc::new(Mutex::new(())),
            owner: StdMutex::new(None),
            acquisitions: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Resource identity
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<String> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Acquire the resource for `holder`
    ///
    /// With `timeout = None` this waits until the resource is free. With a
    /// timeout it returns `ResourceError::Timeout` once the limit elapses.
    pub async fn acquire(
        self: &Arc<Self>,
        holder: &str,
        timeout: Option<Duration>,
    ) -> ResourceResult<ResourceGuard> {
        debug!(resource = %self.id, worker = holder, timeout_ms = ?timeout.map(|t| t.as_millis()), "Attempting to acquire resource");

        let permit = match timeout {
            None => self.lock.clone().lock_owned().await,
            Some(limit) => match tokio::time::timeout(limit, self.lock.clone().lock_owned()).await {
                Ok(permit) => permit,
                Err(_) => {
                    return Err(ResourceError::Timeout {
                        resource: self.id.to_string(),
                        holder: self.owner().unwrap_or_else(|| "nobody".to_string()),
                        waited: limit,
                    });
                }
            },
        };

        self.claim(holder)?;
        Ok(ResourceGuard::new(Arc::clone(self), holder.to_string(), permit))
    }

    /// Acquire without waiting; `None` if the resource is busy
    pub fn try_acquire(self: &Arc<Self>, holder: &str) -> ResourceResult<Option<ResourceGuard>> {
        match self.lock.clone().try_lock_owned() {
            Ok(permit) => {
                self.claim(holder)?;
                Ok(Some(ResourceGuard::new(Arc::clone(self), holder.to_string(), permit)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Record the new owner; only called while the mutex is held
    fn claim(&self, holder: &str) -> ResourceResult<()> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = owner.as_ref() {
            self.violations.fetch_add(1, Ordering::SeqCst);
            warn!(resource = %self.id, holder = %current, claimant = holder, "Owner slot occupied on grant");
            return Err(ResourceError::OwnershipViolation {
                resource: self.id.to_string(),
                holder: current.clone(),
                claimant: holder.to_string(),
            });
        }
        *owner = Some(holder.to_string());
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Clear the owner slot; only called while the mutex is still held
    pub(crate) fn vacate(&self, holder: &str) -> ResourceResult<()> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if owner.as_deref() == Some(holder) {
            *owner = None;
            Ok(())
        } else {
            self.violations.fetch_add(1, Ordering::SeqCst);
            Err(ResourceError::NotHeld {
                resource: self.id.to_string(),
                claimant: holder.to_string(),
            })
        }
    }

    /// Diagnostic snapshot
    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            id: self.id,
            owner: self.owner(),
            locked: self.lock.try_lock().is_err(),
            acquisitions: self.acquisitions.load(Ordering::SeqCst),
            violations: self.violations.load(Ordering::SeqCst),
        }
    }
}

/// Resources A and B, created once per scenario run
#[derive(Debug, Clone)]
pub struct ResourceSet {
    a: Arc<Resource>,
    b: Arc<Resource>,
}

impl Default for ResourceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSet {
    /// Create a fresh, unlocked pair
    pub fn new() -> Self {
        Self {
            a: Arc::new(Resource::new(ResourceId::A)),
            b: Arc::new(Resource::new(ResourceId::B)),
        }
    }

    /// Get one resource
    pub fn resource(&self, id: ResourceId) -> &Arc<Resource> {
        match id {
            ResourceId::A => &self.a,
            ResourceId::B => &self.b,
        }
    }

    /// Acquire `id` for `holder`, optionally bounded by `timeout`
    pub async fn acquire(
        &self,
        id: ResourceId,
        holder: &str,
        timeout: Option<Duration>,
    ) -> ResourceResult<ResourceGuard> {
        self.resource(id).acquire(holder, timeout).await
    }

    /// Acquire `id` only if it is free right now
    pub fn try_acquire(&self, id: ResourceId, holder: &str) -> ResourceResult<Option<ResourceGuard>> {
        self.resource(id).try_acquire(holder)
    }

    /// Release a held resource
    pub fn release(&self, guard: ResourceGuard) -> ResourceResult<()> {
        guard.release()
    }

    /// Current owner of `id`
    pub fn owner(&self, id: ResourceId) -> Option<String> {
        self.resource(id).owner()
    }

    /// Snapshot of one resource
    pub fn snapshot(&self, id: ResourceId) -> ResourceSnapshot {
        self.resource(id).snapshot()
    }

    /// Snapshots of both resources
    pub fn snapshots(&self) -> Vec<ResourceSnapshot> {
        ResourceId::ALL.iter().map(|id| self.snapshot(*id)).collect()
    }

    /// Both resources unowned and unlocked
    pub fn is_idle(&self) -> bool {
        self.snapshots().iter().all(ResourceSnapshot::is_free)
    }

    /// Total owner-slot violations across both resources
    pub fn violations(&self) -> u64 {
        self.snapshots().iter().map(|s| s.violations).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_set_is_idle() {
        let set = ResourceSet::new();
        assert!(set.is_idle());
        assert_eq!(set.violations(), 0);
    }

    #[tokio::test]
    async fn test_acquire_sets_owner() {
        let set = ResourceSet::new();
        let _guard = set.acquire(ResourceId::A, "P1", None).await.unwrap();

        let snapshot = set.snapshot(ResourceId::A);
        assert_eq!(snapshot.owner.as_deref(), Some("P1"));
        assert!(snapshot.locked);
        assert_eq!(snapshot.acquisitions, 1);
        assert!(set.snapshot(ResourceId::B).is_free());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_acquire_times_out() {
        let set = ResourceSet::new();
        let _held = set.acquire(ResourceId::B, "P1", None).await.unwrap();

        let err = set
            .acquire(ResourceId::B, "P2", Some(Duration::from_millis(500)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("P1"));
        assert_eq!(set.owner(ResourceId::B).as_deref(), Some("P1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_acquires_after_release() {
        let set = ResourceSet::new();
        let held = set.acquire(ResourceId::A, "P1", None).await.unwrap();

        let waiter = {
            let set = set.clone();
            tokio::spawn(async move {
                let guard = set
                    .acquire(ResourceId::A, "P2", Some(Duration::from_secs(5)))
                    .await
                    .unwrap();
                guard.holder().to_string()
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        set.release(held).unwrap();

        assert_eq!(waiter.await.unwrap(), "P2");
        assert!(set.is_idle());
    }

    #[tokio::test]
    async fn test_try_acquire_busy() {
        let set = ResourceSet::new();
        let _held = set.try_acquire(ResourceId::A, "P1").unwrap().unwrap();
        assert!(set.try_acquire(ResourceId::A, "P2").unwrap().is_none());
        assert!(set.try_acquire(ResourceId::B, "P2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vacate_by_non_holder_is_rejected() {
        let set = ResourceSet::new();
        let _held = set.acquire(ResourceId::A, "P1", None).await.unwrap();

        let err = set.resource(ResourceId::A).vacate("P2").unwrap_err();
        assert_eq!(err.code(), "E102");
        assert_eq!(set.owner(ResourceId::A).as_deref(), Some("P1"));
        assert_eq!(set.violations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let set = ResourceSet::new();
        let inside = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for idx in 0..8 {
            let set = set.clone();
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let holder = format!("P{}", idx + 1);
                for _ in 0..20 {
                    let guard = set.acquire(ResourceId::A, &holder, None).await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.release().unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(set.snapshot(ResourceId::A).acquisitions, 160);
        assert_eq!(set.violations(), 0);
        assert!(set.is_idle());
    }
}
