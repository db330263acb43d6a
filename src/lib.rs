// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! # perfdrive: In-Process Load Generation
//!
//! `perfdrive` drives a caller-supplied unit of work for a fixed number of
//! invocations across concurrent workers, while continuously aggregating
//! per-key throughput and latency. It is built on top of `tokio`.
//!
//! ## Core Concepts
//!
//! - **[`Dispatcher`]**: Partitions a total invocation count (`throughput`)
//!   across `parallels` worker tasks and runs the unit of work exactly that
//!   many times. See [`DispatchPlan`] for the partitioning rule and
//!   [`ExecutionPolicy`] for whether invocations may overlap.
//! - **[`PerformanceAggregator`]**: Accepts concurrent recordings per key and,
//!   on every tick, derives a [`PerformanceSnapshot`] (throughput, average
//!   throughput, response time, average response time).
//! - **[`Scheduler`]**: Runs named recurring tasks that never overlap with
//!   themselves. The aggregator's recomputation is one such task.
//! - **[`LoadRun`]**: Wires the three together and stops recomputation once a
//!   snapshot shows the target volume.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use perfdrive::{AggregatorSettings, ExecutionPolicy, LoadRun, RunConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::new(4, 2_000)
//!         .with_policy(ExecutionPolicy::Concurrent)
//!         .with_aggregator_settings(
//!             AggregatorSettings::default().with_interval(Duration::from_millis(500)),
//!         );
//!     let run = LoadRun::new("CommonTps", "CommonTps.Count", config)?;
//!
//!     let report = run
//!         .run(|| async {
//!             // one request against the system under test
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok(())
//!         })
//!         .await?;
//!
//!     if let Some(snapshot) = report.snapshot {
//!         println!("{snapshot}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! All diagnostics go through the `log` facade; install any backend (for
//! example `env_logger`) to see per-tick metric lines. With the `tracing`
//! feature enabled, dispatches and runs are also wrapped in `tracing` spans.

pub mod dispatch;
mod error;
pub mod metrics;
pub mod run;
pub mod scheduler;

pub use dispatch::{DispatchPlan, DispatchSummary, Dispatcher, ExecutionPolicy, WorkerReport};
pub use error::{Error, Result};
pub use metrics::{
    AggregatorSettings, LogContextProvider, PerformanceAggregator, PerformanceSnapshot,
    SnapshotContext, SnapshotHandler, StatusCodeCounter, StatusCount,
};
pub use run::{LoadRun, RunConfig, RunReport};
pub use scheduler::{Scheduler, TaskState};
