// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ensure_positive, Result};

/// How a fixed invocation volume is split across workers.
///
/// Every worker runs `throughput / parallels` invocations, except the last
/// one, which also absorbs `throughput % parallels`. The partition sizes always
/// sum to `throughput` exactly, even when `parallels > throughput`.
///
/// ```rust
/// use perfdrive::DispatchPlan;
///
/// let plan = DispatchPlan::new(3, 10)?;
/// assert_eq!(plan.partitions(), vec![3, 3, 4]);
///
/// let sparse = DispatchPlan::new(5, 2)?;
/// assert_eq!(sparse.partitions(), vec![0, 0, 0, 0, 2]);
/// # Ok::<(), perfdrive::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    parallels: usize,
    throughput: usize,
}

impl DispatchPlan {
    /// Creates a plan for `throughput` invocations over `parallels` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// either value is zero.
    pub fn new(parallels: usize, throughput: usize) -> Result<Self> {
        ensure_positive("parallels", parallels)?;
        ensure_positive("throughput", throughput)?;
        Ok(Self {
            parallels,
            throughput,
        })
    }

    #[inline]
    pub const fn parallels(&self) -> usize {
        self.parallels
    }

    #[inline]
    pub const fn throughput(&self) -> usize {
        self.throughput
    }

    /// Invocations assigned to every worker.
    #[inline]
    pub const fn base_units(&self) -> usize {
        self.throughput / self.parallels
    }

    /// Extra invocations absorbed by the last worker.
    #[inline]
    pub const fn remainder(&self) -> usize {
        self.throughput % self.parallels
    }

    /// Invocations assigned to `worker`; zero for an index outside the plan.
    pub const fn units_for(&self, worker: usize) -> usize {
        if worker >= self.parallels {
            0
        } else if worker == self.parallels - 1 {
            self.base_units() + self.remainder()
        } else {
            self.base_units()
        }
    }

    /// Invocations per worker, in worker order.
    pub fn partitions(&self) -> Vec<usize> {
        (0..self.parallels).map(|worker| self.units_for(worker)).collect()
    }
}
