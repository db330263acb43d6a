// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Immutable reading of one metrics key, taken at a tick boundary.
///
/// A fresh snapshot is derived on every recomputation tick. Counts are
/// cumulative since the key was first recorded; `throughput` and `rt`
/// describe only the last tick.
///
/// # Consistency Note
///
/// Producers keep recording while a tick is derived, so a snapshot may
/// include part of a burst of concurrent recordings. Every recording lands
/// in exactly one tick; none is lost or counted twice.
///
/// # Example
///
/// ```rust,ignore
/// if let Some(snapshot) = aggregator.key_performance("checkout") {
///     println!("{} done, {}/tick, avg rt {:.3}ms",
///         snapshot.total_count, snapshot.average_throughput, snapshot.average_rt);
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct PerformanceSnapshot {
    /// Cumulative number of units recorded for the key.
    pub total_count: u64,

    /// Units recorded since the previous tick.
    pub throughput: u64,

    /// `total_count` divided by the number of ticks that saw non-zero
    /// throughput. Idle ticks do not dilute this average.
    pub average_throughput: u64,

    /// Mean response time of the units recorded during the last tick that
    /// recorded any, in milliseconds.
    pub rt: f64,

    /// Mean response time over every recorded unit, in milliseconds.
    pub average_rt: f64,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            total_count: 0,
            throughput: 0,
            average_throughput: 0,
            rt: 0.0,
            average_rt: 0.0,
        }
    }
}

impl fmt::Display for PerformanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total_count: {}, throughput: {}, average_throughput: {}, rt: {:.3}ms, average_rt: {:.3}ms",
            self.total_count, self.throughput, self.average_throughput, self.rt, self.average_rt
        )
    }
}
