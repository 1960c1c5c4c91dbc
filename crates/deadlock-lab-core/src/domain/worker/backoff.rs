//! Backoff between retries
//!
//! The delay is `base + step * (retry - 1)`, capped after eight steps, plus a
//! uniform jitter in `[0, jitter]`. Jitter is what breaks the symmetric
//! timing of two workers that timed out together.

use rand::prelude::*;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

/// Growth steps after which the delay stops increasing
const MAX_STEPS: u32 = 8;

/// Backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry
    pub base: Duration,
    /// Increase per additional retry
    pub step: Duration,
    /// Upper bound of the random extra delay
    pub jitter: Duration,
}

impl Backoff {
    /// Fixed delay with jitter
    pub fn fixed(base: Duration, jitter: Duration) -> Self {
        Self {
            base,
            step: Duration::ZERO,
            jitter,
        }
    }

    /// Half the hold time plus up to another half, as a default
    pub fn for_hold_time(hold_time: Duration) -> Self {
        Self::fixed(hold_time / 2, hold_time / 2)
    }

    /// Set the linear growth step
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Longest delay this policy can produce
    pub fn ceiling(&self) -> Duration {
        self.base + self.step * MAX_STEPS + self.jitter
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let steps = retry.saturating_sub(1).min(MAX_STEPS);
        let fixed = self.base + self.step * steps;
        if self.jitter.is_zero() {
            return fixed;
        }
        let extra = rng.gen_range(0.0..=self.jitter.as_secs_f64());
        fixed + Duration::from_secs_f64(extra)
    }
}

/// Deterministic RNG for one worker, keyed by its name
pub fn worker_rng(name: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}
