// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ensure_nonzero, Result};
use crate::scheduler::Scheduler;

use super::PerformanceSnapshot;

/// Supplies extra text prepended to every automatic metrics log line.
pub type LogContextProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Invoked with every snapshot the aggregator derives.
///
/// Errors and panics raised by the handler are logged and never stop the
/// recomputation sweep.
pub type SnapshotHandler = Arc<dyn Fn(&SnapshotContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// What a [`SnapshotHandler`] sees for one key on one tick.
pub struct SnapshotContext<'a> {
    pub(crate) aggregator: &'a str,
    pub(crate) key: &'a str,
    pub(crate) snapshot: &'a PerformanceSnapshot,
    pub(crate) scheduler: &'a Scheduler,
    pub(crate) task_name: &'a str,
    pub(crate) owns_task: &'a AtomicBool,
}

impl SnapshotContext<'_> {
    /// Name of the aggregator that produced the snapshot.
    pub fn aggregator(&self) -> &str {
        self.aggregator
    }

    /// Metrics key the snapshot belongs to.
    pub fn key(&self) -> &str {
        self.key
    }

    /// The freshly derived snapshot.
    pub fn snapshot(&self) -> &PerformanceSnapshot {
        self.snapshot
    }

    /// Stops the aggregator's periodic recomputation after the current sweep.
    ///
    /// Returns `false` if recomputation was already stopped.
    pub fn stop_recompute(&self) -> bool {
        self.owns_task.swap(false, Ordering::SeqCst) && self.scheduler.stop_task(self.task_name)
    }
}

/// Configuration for a [`PerformanceAggregator`](crate::PerformanceAggregator).
///
/// # Example
///
/// ```rust
/// use perfdrive::AggregatorSettings;
/// use std::time::Duration;
///
/// let settings = AggregatorSettings::default()
///     .with_interval(Duration::from_millis(500))
///     .with_log_context(|| "region: eu-west".to_string())
///     .with_snapshot_handler(|ctx| {
///         if ctx.snapshot().total_count >= 1_000 {
///             ctx.stop_recompute();
///         }
///         Ok(())
///     });
/// assert!(settings.auto_logging);
/// ```
#[derive(Clone)]
pub struct AggregatorSettings {
    /// Log one line per key on every tick.
    pub auto_logging: bool,
    /// Delay before the first recomputation tick.
    pub initial_delay: Duration,
    /// Interval between recomputation ticks.
    pub interval: Duration,
    /// Optional prefix for automatic log lines.
    pub log_context: Option<LogContextProvider>,
    /// Optional per-snapshot callback.
    pub snapshot_handler: Option<SnapshotHandler>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            auto_logging: true,
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            log_context: None,
            snapshot_handler: None,
        }
    }
}

impl fmt::Debug for AggregatorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorSettings")
            .field("auto_logging", &self.auto_logging)
            .field("initial_delay", &self.initial_delay)
            .field("interval", &self.interval)
            .field("log_context", &self.log_context.is_some())
            .field("snapshot_handler", &self.snapshot_handler.is_some())
            .finish()
    }
}

impl AggregatorSettings {
    pub fn with_auto_logging(mut self, enabled: bool) -> Self {
        self.auto_logging = enabled;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_log_context<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.log_context = Some(Arc::new(provider));
        self
    }

    pub fn with_snapshot_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SnapshotContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.snapshot_handler = Some(Arc::new(handler));
        self
    }

    /// Checks that both durations are non-zero.
    pub fn validate(&self) -> Result<()> {
        ensure_nonzero("initial_delay", self.initial_delay)?;
        ensure_nonzero("interval", self.interval)
    }

    /// Renders the log context prefix, including its trailing separator.
    pub(crate) fn context_prefix(&self) -> String {
        match &self.log_context {
            Some(provider) => {
                let text = provider();
                if text.trim().is_empty() {
                    String::new()
                } else {
                    format!("{text}, ")
                }
            }
            None => String::new(),
        }
    }
}
