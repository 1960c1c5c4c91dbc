//! Deadlock avoidance with the banker's algorithm
//!
//! Here A and B are counted pools rather than single locks. Every worker
//! declares a maximum claim up front and asks for partial amounts; the
//! `Banker` only grants a request if the system can still reach a state where
//! every worker finishes. Denied workers back off and ask again.

pub mod algorithm;
pub mod worker;

pub use algorithm::{Banker, BankerSnapshot, Decision, Units};
pub use worker::BankerWorker;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Units of each resource for a run with `workers` participants
pub fn capacity_for(workers: usize) -> Units {
    let count = workers.saturating_sub(1).max(2);
    Units::splat(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Declared claims of 1-2 units per resource, reproducible per worker count
pub fn claims_for(workers: usize) -> Vec<Units> {
    let mut rng = StdRng::seed_from_u64(workers as u64);
    (0..workers)
        .map(|_| Units::new(1 + rng.gen_range(0..=1), 1 + rng.gen_range(0..=1)))
        .collect()
}
