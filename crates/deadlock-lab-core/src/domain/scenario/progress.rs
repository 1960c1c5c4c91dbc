//! Optional progress reporting

use std::sync::Mutex;

/// Receives worker progress during a run
pub trait ProgressReporter: Send + Sync {
    /// All `total` workers have been launched
    fn started(&self, total: usize);

    /// `completed` of `total` workers reached a terminal state
    fn finished(&self, completed: usize, total: usize);
}

/// Reporter that records every call, for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingProgress {
    calls: Mutex<Vec<(usize, usize)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(completed, total)` pairs seen so far; `started` is recorded as `(0, total)`
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn push(&self, entry: (usize, usize)) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(entry);
        }
    }
}

impl ProgressReporter for RecordingProgress {
    fn started(&self, total: usize) {
        self.push((0, total));
    }

    fn finished(&self, completed: usize, total: usize) {
        self.push((completed, total));
    }
}
