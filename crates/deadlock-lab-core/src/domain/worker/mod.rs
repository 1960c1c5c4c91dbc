//! Workers competing for resources A and B
//!
//! Three policies share one state machine and differ only in acquisition
//! order and failure handling:
//!
//! - **Naive**: blocking acquisition in the assigned order. Two workers with
//!   reversed orders each hold what the other needs, forever.
//! - **Ordered**: blocking acquisition in the global order (A before B), so
//!   no wait-for cycle can form.
//! - **Retry**: the second acquisition is timed; on timeout the worker
//!   releases the first resource, backs off and starts over.

pub mod backoff;
pub mod runner;
pub mod state;

pub use backoff::Backoff;
pub use runner::{Worker, WorkerExit, WorkerSpec, WorkerTiming};
pub use state::{AcquisitionOrder, Policy, WorkerState, WorkerStatus};
