// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Load Run Orchestration
//!
//! [`LoadRun`] wires the pieces together for one fixed-volume run:
//!
//! 1. A [`PerformanceAggregator`] named after the run starts periodic
//!    recomputation on the run's [`Scheduler`].
//! 2. A [`Dispatcher`] drives the unit of work, timing every invocation and
//!    recording it under the run's key.
//! 3. The first snapshot whose `total_count` equals the target volume logs
//!    the status-code tally and stops recomputation.
//!
//! The auto-stop is cooperative: it only prevents future ticks and never
//! cancels workers.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use crate::dispatch::{DispatchPlan, DispatchSummary, Dispatcher, ExecutionPolicy};
use crate::error::{ensure_nonzero, ensure_not_blank, Error, Result};
use crate::metrics::{AggregatorSettings, PerformanceAggregator, PerformanceSnapshot, StatusCodeCounter};
use crate::scheduler::Scheduler;

/// Parameters of a [`LoadRun`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of concurrent workers
    pub parallels: usize,
    /// Total number of invocations
    pub throughput: usize,
    pub policy: ExecutionPolicy,
    /// How long to wait after dispatch for the snapshot that reaches the target
    pub settle_timeout: Duration,
    pub aggregator: AggregatorSettings,
}

impl RunConfig {
    pub fn new(parallels: usize, throughput: usize) -> Self {
        Self {
            parallels,
            throughput,
            policy: ExecutionPolicy::default(),
            settle_timeout: Duration::from_secs(5),
            aggregator: AggregatorSettings::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_aggregator_settings(mut self, settings: AggregatorSettings) -> Self {
        self.aggregator = settings;
        self
    }

    /// Validates every field without starting anything.
    pub fn validate(&self) -> Result<()> {
        DispatchPlan::new(self.parallels, self.throughput)?;
        ensure_nonzero("settle_timeout", self.settle_timeout)?;
        self.aggregator.validate()
    }
}

/// Outcome of a completed [`LoadRun`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dispatch: DispatchSummary,
    /// Last snapshot derived for the run's key, if any tick ran
    pub snapshot: Option<PerformanceSnapshot>,
    /// True if a snapshot reached the target before the settle timeout
    pub auto_stopped: bool,
    /// Status-code tally rendered one code per line
    pub status_summary: String,
}

/// One fixed-volume load run against a unit of work.
///
/// ```rust,no_run
/// use perfdrive::{LoadRun, RunConfig};
///
/// # async fn example() -> perfdrive::Result<()> {
/// let run = LoadRun::new("CommonTps", "CommonTps.Count", RunConfig::new(4, 2_000))?;
/// let status = run.status_counter().clone();
///
/// let report = run
///     .run(move || {
///         let status = status.clone();
///         async move {
///             // issue one request, then record its status code
///             status.record(200);
///             Ok(())
///         }
///     })
///     .await?;
/// println!("{}", report.status_summary);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LoadRun {
    name: String,
    key: String,
    config: RunConfig,
    scheduler: Scheduler,
    status: StatusCodeCounter,
}

impl LoadRun {
    /// Creates a run whose metrics aggregator is called `name` and records under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// `name` or `key` is blank or the config is invalid.
    pub fn new(name: impl Into<String>, key: impl Into<String>, config: RunConfig) -> Result<Self> {
        let name = name.into();
        let key = key.into();
        ensure_not_blank("name", &name)?;
        ensure_not_blank("key", &key)?;
        config.validate()?;

        Ok(Self {
            name,
            key,
            config,
            scheduler: Scheduler::new(),
            status: StatusCodeCounter::new(),
        })
    }

    /// Uses a shared scheduler instead of a private one.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Uses a shared status-code tally instead of a private one.
    pub fn with_status_counter(mut self, status: StatusCodeCounter) -> Self {
        self.status = status;
        self
    }

    /// Name of the run's metrics aggregator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metrics key every timed invocation is recorded under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parameters the run was created with.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Scheduler that drives the run's recomputation.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Tally the unit of work can report response status codes into.
    pub fn status_counter(&self) -> &StatusCodeCounter {
        &self.status
    }

    /// Runs `unit` `throughput` times and waits for the auto-stop snapshot.
    ///
    /// Recomputation is always stopped before this returns. If dispatch
    /// fails, the first failure is returned and no report is produced.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if another run with the same name is
    ///   already recomputing on the shared scheduler. Nothing is dispatched.
    /// * [`Error::Work`] or [`Error::Join`] if dispatch fails.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "load_run", skip_all, fields(name = %self.name, key = %self.key))
    )]
    pub async fn run<F, Fut>(&self, unit: F) -> Result<RunReport>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let dispatcher = Dispatcher::new(self.config.parallels, self.config.throughput)?
            .with_policy(self.config.policy);
        let target = self.config.throughput as u64;

        let (reached_tx, mut reached_rx) = watch::channel(false);
        let key = self.key.clone();
        let status = self.status.clone();
        let user_handler = self.config.aggregator.snapshot_handler.clone();
        let settings = self
            .config
            .aggregator
            .clone()
            .with_snapshot_handler(move |ctx| {
                if ctx.key() == key && ctx.snapshot().total_count == target {
                    let summary = status.summary();
                    if !summary.is_empty() {
                        info!("{}", summary.trim_end());
                    }
                    info!(
                        "{}: target of {} reached, stopping recomputation.",
                        ctx.aggregator(),
                        target
                    );
                    ctx.stop_recompute();
                    reached_tx.send_replace(true);
                }
                match &user_handler {
                    Some(handler) => handler(ctx),
                    None => Ok(()),
                }
            });

        let aggregator = PerformanceAggregator::new(self.name.clone(), settings, self.scheduler.clone())?;
        if !aggregator.start()? {
            return Err(Error::invalid_argument(
                "name",
                format!(
                    "recomputation task '{}' is already registered on this scheduler",
                    aggregator.task_name()
                ),
            ));
        }
        info!(
            "{}: running {} invocation(s) of '{}' across {} worker(s).",
            self.name, target, self.key, self.config.parallels
        );

        let dispatch = match dispatcher.dispatch_timed(&aggregator, &self.key, unit).await {
            Ok(summary) => summary,
            Err(err) => {
                aggregator.stop();
                return Err(err);
            }
        };

        let auto_stopped = matches!(
            tokio::time::timeout(self.config.settle_timeout, reached_rx.wait_for(|reached| *reached)).await,
            Ok(Ok(_))
        );
        if !auto_stopped {
            warn!(
                "{}: no snapshot reached {} within {:?}; stopping recomputation.",
                self.name, target, self.config.settle_timeout
            );
        }
        aggregator.stop();

        Ok(RunReport {
            dispatch,
            snapshot: aggregator.key_performance(&self.key),
            auto_stopped,
            status_summary: self.status.summary(),
        })
    }
}
