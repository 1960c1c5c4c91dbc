//! Exclusive resources contended for by workers
//!
//! A scenario owns one `ResourceSet` holding resources A and B. Each is a
//! mutex with an owner slot kept for diagnostics.
//!
//! # Architecture
//!
//! - **Types**: `ResourceId`, `ResourceSnapshot`, `ResourceError`
//! - **Set**: `ResourceSet` with blocking, timed and non-blocking acquisition
//! - **Guards**: `ResourceGuard`, released explicitly or on drop
//!
//! # Example
//!
//! ```ignore
//! use deadlock_lab_core::domain::resources::{ResourceId, ResourceSet};
//!
//! let set = ResourceSet::new();
//! let guard = set.acquire(ResourceId::A, "P1", Some(Duration::from_secs(1))).await?;
//! // ... work while holding A ...
//! set.release(guard)?;
//! ```

pub mod guard;
pub mod set;
pub mod types;

pub use guard::ResourceGuard;
pub use set::{Resource, ResourceSet};
pub use types::{ResourceError, ResourceId, ResourceResult, ResourceSnapshot};
