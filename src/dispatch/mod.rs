// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Fixed-Volume Work Dispatch
//!
//! A [`Dispatcher`] runs a caller-supplied unit of work exactly `throughput`
//! times across `parallels` tokio tasks, partitioned by a [`DispatchPlan`].
//! It does not rate-limit; the only backpressure is the worker count and,
//! under [`ExecutionPolicy::Serialized`], the shared invocation lock.
//!
//! A unit of work is any `Fn() -> impl Future<Output = anyhow::Result<()>>`.
//! Returning `Err` marks that invocation as failed and ends its worker's loop.

mod dispatcher;
mod plan;

pub use dispatcher::{DispatchSummary, Dispatcher, ExecutionPolicy, WorkerReport};
pub use plan::DispatchPlan;
