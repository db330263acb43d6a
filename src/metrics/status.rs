// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of responses seen with one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCount {
    pub code: u16,
    pub count: u64,
}

impl fmt::Display for StatusCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[StatusCode: {}, Count: {}]", self.code, self.count)
    }
}

/// Tally of response status codes reported by units of work.
///
/// Cloned handles share one tally, so a run can hand a clone to its unit of
/// work and read the totals once the run completes.
#[derive(Debug, Clone, Default)]
pub struct StatusCodeCounter {
    counts: Arc<Mutex<HashMap<u16, u64>>>,
}

impl StatusCodeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts_mut(&self) -> MutexGuard<'_, HashMap<u16, u64>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one response with the given status code.
    pub fn record(&self, code: u16) {
        *self.counts_mut().entry(code).or_insert(0) += 1;
    }

    /// Number of responses recorded with `code`.
    pub fn count_of(&self, code: u16) -> u64 {
        self.counts_mut().get(&code).copied().unwrap_or(0)
    }

    /// Number of responses recorded across all codes.
    pub fn total(&self) -> u64 {
        self.counts_mut().values().sum()
    }

    /// Returns per-code counts, most frequent first (ties by ascending code).
    pub fn counts(&self) -> Vec<StatusCount> {
        let mut counts: Vec<StatusCount> = self
            .counts_mut()
            .iter()
            .map(|(&code, &count)| StatusCount { code, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.code.cmp(&b.code)));
        counts
    }

    /// Renders [`counts`](Self::counts) one entry per line.
    pub fn summary(&self) -> String {
        self.counts()
            .iter()
            .map(|count| format!("{count}\n"))
            .collect()
    }

    pub fn clear(&self) {
        self.counts_mut().clear();
    }
}
