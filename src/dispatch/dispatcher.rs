// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::metrics::PerformanceAggregator;

use super::DispatchPlan;

/// Whether workers may run the unit of work at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// At most one invocation runs at any instant, process-wide. Workers
    /// still run concurrently but queue on one shared lock around each
    /// invocation. This throttles the downstream target to a single
    /// in-flight call.
    #[default]
    Serialized,
    /// Every worker invokes the unit of work independently.
    Concurrent,
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPolicy::Serialized => write!(f, "serialized"),
            ExecutionPolicy::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// What one worker did with its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    /// Invocations assigned by the plan
    pub assigned: usize,
    /// Invocations that returned `Ok`
    pub completed: usize,
    /// True if an invocation failed and ended the worker's loop early
    pub failed: bool,
}

/// Outcome of a dispatch in which every invocation succeeded.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub parallels: usize,
    pub throughput: usize,
    /// Successful invocations across all workers
    pub completed: usize,
    /// Wall-clock time from launching the workers to the last one finishing
    pub elapsed: Duration,
    pub workers: Vec<WorkerReport>,
}

struct WorkerOutcome {
    report: WorkerReport,
    error: Option<anyhow::Error>,
}

/// Drives a fixed number of unit-of-work invocations across parallel workers.
///
/// ```rust,no_run
/// use perfdrive::{Dispatcher, ExecutionPolicy};
///
/// # async fn example() -> perfdrive::Result<()> {
/// let dispatcher = Dispatcher::new(4, 2_000)?.with_policy(ExecutionPolicy::Concurrent);
/// let summary = dispatcher
///     .dispatch(|| async {
///         // issue one request
///         Ok(())
///     })
///     .await?;
/// assert_eq!(summary.completed, 2_000);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    plan: DispatchPlan,
    policy: ExecutionPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher using the default [`ExecutionPolicy::Serialized`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either value is zero.
    pub fn new(parallels: usize, throughput: usize) -> Result<Self> {
        Ok(Self::from_plan(DispatchPlan::new(parallels, throughput)?))
    }

    pub fn from_plan(plan: DispatchPlan) -> Self {
        Self {
            plan,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Runs `unit` exactly `throughput` times across `parallels` worker tasks.
    ///
    /// Each worker runs its partition sequentially. A failing invocation ends
    /// that worker's loop; the other workers keep going. Once all workers have
    /// finished, every failure is logged and the lowest-index one is returned.
    ///
    /// # Errors
    ///
    /// * [`Error::Work`] if an invocation returned an error.
    /// * [`Error::Join`] if a worker task panicked.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "dispatch",
            skip_all,
            fields(parallels = self.plan.parallels(), throughput = self.plan.throughput(), policy = %self.policy)
        )
    )]
    pub async fn dispatch<F, Fut>(&self, unit: F) -> Result<DispatchSummary>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let plan = self.plan;
        info!(
            "Dispatching {} invocation(s) across {} worker(s), {} execution.",
            plan.throughput(),
            plan.parallels(),
            self.policy
        );

        let unit = Arc::new(unit);
        let gate = match self.policy {
            ExecutionPolicy::Serialized => Some(Arc::new(Mutex::new(()))),
            ExecutionPolicy::Concurrent => None,
        };

        let started = Instant::now();
        let handles: Vec<_> = (0..plan.parallels())
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    plan.units_for(worker),
                    unit.clone(),
                    gate.clone(),
                ))
            })
            .collect();
        let joined = futures::future::join_all(handles).await;
        let elapsed = started.elapsed();

        let mut workers = Vec::with_capacity(joined.len());
        let mut first_error = None;
        for (worker, result) in joined.into_iter().enumerate() {
            match result {
                Ok(WorkerOutcome { report, error: None }) => workers.push(report),
                Ok(WorkerOutcome {
                    report,
                    error: Some(source),
                }) => {
                    error!(
                        "Worker {} stopped after {}/{} invocation(s): {:?}",
                        worker, report.completed, report.assigned, source
                    );
                    if first_error.is_none() {
                        first_error = Some(Error::Work {
                            worker,
                            completed: report.completed,
                            source,
                        });
                    }
                    workers.push(report);
                }
                Err(source) => {
                    error!("Worker {} task did not complete: {}", worker, source);
                    if first_error.is_none() {
                        first_error = Some(Error::Join { worker, source });
                    }
                    workers.push(WorkerReport {
                        worker,
                        assigned: plan.units_for(worker),
                        completed: 0,
                        failed: true,
                    });
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let completed = workers.iter().map(|report| report.completed).sum();
        info!(
            "Dispatch finished: {} invocation(s) in {:?}.",
            completed, elapsed
        );
        Ok(DispatchSummary {
            parallels: plan.parallels(),
            throughput: plan.throughput(),
            completed,
            elapsed,
            workers,
        })
    }

    /// Like [`dispatch`](Self::dispatch), but times every invocation and
    /// records successful ones into `aggregator` under `key`.
    ///
    /// The clock starts just before the unit of work and stops just after it
    /// returns, so time spent queueing for the serialized lock is excluded.
    /// Failed invocations are not recorded.
    pub async fn dispatch_timed<F, Fut>(
        &self,
        aggregator: &PerformanceAggregator,
        key: &str,
        unit: F,
    ) -> Result<DispatchSummary>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let aggregator = aggregator.clone();
        let key: Arc<str> = Arc::from(key);
        let unit = Arc::new(unit);

        self.dispatch(move || {
            let aggregator = aggregator.clone();
            let key = key.clone();
            let unit = unit.clone();
            async move {
                let started = Instant::now();
                let result = unit().await;
                let rt_millis = started.elapsed().as_secs_f64() * 1000.0;
                match result {
                    Ok(()) => {
                        aggregator.increment_key_count(&key, rt_millis);
                        Ok(())
                    }
                    Err(e) => {
                        trace!("Invocation for '{}' failed after {:.3}ms.", key, rt_millis);
                        Err(e)
                    }
                }
            }
        })
        .await
    }
}

async fn run_worker<F, Fut>(
    worker: usize,
    assigned: usize,
    unit: Arc<F>,
    gate: Option<Arc<Mutex<()>>>,
) -> WorkerOutcome
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    debug!("Worker {} starting with {} invocation(s).", worker, assigned);

    let mut completed = 0;
    for _ in 0..assigned {
        let result = match &gate {
            Some(gate) => {
                let _turn = gate.lock().await;
                unit().await
            }
            None => unit().await,
        };
        if let Err(error) = result {
            return WorkerOutcome {
                report: WorkerReport {
                    worker,
                    assigned,
                    completed,
                    failed: true,
                },
                error: Some(error),
            };
        }
        completed += 1;
    }

    debug!("Worker {} finished {} invocation(s).", worker, completed);
    WorkerOutcome {
        report: WorkerReport {
            worker,
            assigned,
            completed,
            failed: false,
        },
        error: None,
    }
}
