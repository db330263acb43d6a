// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Live Throughput and Latency Metrics
//!
//! This module aggregates per-key counts and response times while a run is in
//! progress and derives statistics on a fixed cadence.
//!
//! # Metrics
//!
//! - **Total count**: units recorded for a key since it was first seen
//! - **Throughput**: units recorded during the last tick
//! - **Average throughput**: total count over the ticks that recorded anything
//! - **RT**: mean response time of the last tick's units
//! - **Average RT**: mean response time of every unit
//!
//! # Design Principles
//!
//! - **Lock-free recording**: producers only touch `AtomicU64` accumulators
//! - **Single writer for derived values**: only the recomputation tick writes them
//! - **Integer accumulation**: response times are summed as microseconds
//!
//! # Example
//!
//! ```rust,no_run
//! use perfdrive::{AggregatorSettings, PerformanceAggregator, Scheduler};
//!
//! # async fn example() -> perfdrive::Result<()> {
//! let aggregator = PerformanceAggregator::new("api", AggregatorSettings::default(), Scheduler::new())?;
//! aggregator.start()?;
//!
//! aggregator.increment_key_count("api.version", 3.2);
//!
//! // After a tick...
//! if let Some(snapshot) = aggregator.key_performance("api.version") {
//!     println!("throughput: {}", snapshot.throughput);
//!     println!("average rt: {:.3}ms", snapshot.average_rt);
//! }
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod counter;
mod settings;
mod snapshot;
mod status;

pub use aggregator::PerformanceAggregator;
pub use settings::{AggregatorSettings, LogContextProvider, SnapshotContext, SnapshotHandler};
pub use snapshot::PerformanceSnapshot;
pub use status::{StatusCodeCounter, StatusCount};
