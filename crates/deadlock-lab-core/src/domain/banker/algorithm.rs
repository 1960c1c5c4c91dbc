//! Banker's algorithm over the two counted resources

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::domain::resources::ResourceId;
use crate::error::{Error, Result};

/// Unit counts for A and B
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Units {
    pub a: u32,
    pub b: u32,
}

impl Units {
    pub const ZERO: Units = Units { a: 0, b: 0 };

    pub fn new(a: u32, b: u32) -> Self {
        Self { a, b }
    }

    /// Same count of every resource
    pub fn splat(count: u32) -> Self {
        Self::new(count, count)
    }

    pub fn get(&self, id: ResourceId) -> u32 {
        match id {
            ResourceId::A => self.a,
            ResourceId::B => self.b,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Every component fits within `other`
    pub fn fits(&self, other: Units) -> bool {
        self.a <= other.a && self.b <= other.b
    }

    pub fn plus(self, other: Units) -> Units {
        Units::new(self.a + other.a, self.b + other.b)
    }

    pub fn saturating_minus(self, other: Units) -> Units {
        Units::new(self.a.saturating_sub(other.a), self.b.saturating_sub(other.b))
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[A={}, B={}]", self.a, self.b)
    }
}

/// Why a request was or was not granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Granted,
    /// The request exceeds the worker's remaining need
    ExceedsNeed,
    /// Not enough free units right now
    Unavailable,
    /// Granting would leave the system in an unsafe state
    Unsafe,
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::ExceedsNeed => "exceeds_need",
            Self::Unavailable => "unavailable",
            Self::Unsafe => "unsafe",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Copy of the banker's books
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankerSnapshot {
    pub capacity: Units,
    pub available: Units,
    pub max_claims: Vec<Units>,
    pub allocation: Vec<Units>,
}

impl BankerSnapshot {
    /// Remaining need of every worker
    pub fn needs(&self) -> Vec<Units> {
        self.max_claims
            .iter()
            .zip(&self.allocation)
            .map(|(max, alloc)| max.saturating_minus(*alloc))
            .collect()
    }

    /// Whether every worker could still run to completion in some order
    pub fn is_safe(&self) -> bool {
        let needs = self.needs();
        let mut work = self.available;
        let mut finished = vec![false; needs.len()];

        loop {
            let mut progressed = false;
            for (worker, need) in needs.iter().enumerate() {
                if !finished[worker] && need.fits(work) {
                    work = work.plus(self.allocation[worker]);
                    finished[worker] = true;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        finished.into_iter().all(|done| done)
    }
}

/// Grants partial requests only when the resulting state is safe
#[derive(Debug)]
pub struct Banker {
    books: Mutex<BankerSnapshot>,
}

impl Banker {
    /// Create a banker with `capacity` units and one declared claim per worker
    pub fn new(capacity: Units, max_claims: Vec<Units>) -> Result<Self> {
        if let Some((worker, claim)) = max_claims
            .iter()
            .enumerate()
            .find(|(_, claim)| !claim.fits(capacity))
        {
            return Err(Error::InvalidInput(format!(
                "claim {} of worker {} exceeds capacity {}",
                claim, worker, capacity
            )));
        }

        let allocation = vec![Units::ZERO; max_claims.len()];
        Ok(Self {
            books: Mutex::new(BankerSnapshot {
                capacity,
                available: capacity,
                max_claims,
                allocation,
            }),
        })
    }

    /// Try to grant `request` to `worker`
    pub fn request(&self, worker: usize, request: Units) -> Result<Decision> {
        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        let need = Self::need_of(&books, worker)?;

        let decision = if !request.fits(need) {
            Decision::ExceedsNeed
        } else if !request.fits(books.available) {
            Decision::Unavailable
        } else {
            let mut trial = books.clone();
            trial.available = trial.available.saturating_minus(request);
            trial.allocation[worker] = trial.allocation[worker].plus(request);
            if trial.is_safe() {
                *books = trial;
                Decision::Granted
            } else {
                Decision::Unsafe
            }
        };

        debug!(worker, request = %request, decision = %decision, available = %books.available, "Banker decision");
        Ok(decision)
    }

    /// Return everything `worker` holds; yields what was released
    pub fn release_all(&self, worker: usize) -> Result<Units> {
        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        Self::need_of(&books, worker)?;

        let released = std::mem::take(&mut books.allocation[worker]);
        books.available = books.available.plus(released);
        Ok(released)
    }

    /// Remaining need of `worker`
    pub fn need(&self, worker: usize) -> Result<Units> {
        let books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        Self::need_of(&books, worker)
    }

    pub fn snapshot(&self) -> BankerSnapshot {
        self.books
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nothing allocated to anyone
    pub fn is_idle(&self) -> bool {
        let books = self.snapshot();
        books.available == books.capacity && books.allocation.iter().all(Units::is_zero)
    }

    fn need_of(books: &BankerSnapshot, worker: usize) -> Result<Units> {
        match (books.max_claims.get(worker), books.allocation.get(worker)) {
            (Some(max), Some(alloc)) => Ok(max.saturating_minus(*alloc)),
            _ => Err(Error::InvalidInput(format!("unknown banker worker {}", worker))),
        }
    }
}
