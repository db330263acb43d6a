// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{debug, error, info};

use crate::error::{ensure_not_blank, panic_message, Result};
use crate::scheduler::Scheduler;

use super::counter::CounterState;
use super::settings::{AggregatorSettings, SnapshotContext};
use super::PerformanceSnapshot;

struct Inner {
    name: String,
    task_name: String,
    settings: AggregatorSettings,
    scheduler: Scheduler,
    /// Set while the recomputation task registered under `task_name` is ours
    owns_task: AtomicBool,
    counters: RwLock<HashMap<String, Arc<CounterState>>>,
}

impl Inner {
    fn counters(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<CounterState>>> {
        self.counters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<CounterState>>> {
        self.counters.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn counter(&self, key: &str) -> Option<Arc<CounterState>> {
        self.counters().get(key).cloned()
    }

    /// Applies `record` to the key's counter, seeding a new one with `seed` if absent.
    fn record<R, S>(&self, key: &str, record: R, seed: S)
    where
        R: Fn(&CounterState),
        S: FnOnce() -> CounterState,
    {
        if let Some(counter) = self.counters().get(key) {
            record(counter);
            return;
        }
        match self.counters_mut().entry(key.to_string()) {
            Entry::Occupied(entry) => record(entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(seed()));
            }
        }
    }

    /// One recomputation sweep over every key.
    fn recompute_all(&self) {
        let counters: Vec<(String, Arc<CounterState>)> = self
            .counters()
            .iter()
            .map(|(key, counter)| (key.clone(), counter.clone()))
            .collect();

        for (key, counter) in counters {
            let snapshot = counter.recompute();
            if self.settings.auto_logging {
                info!(
                    "{}, {}{}: {}",
                    self.name,
                    self.settings.context_prefix(),
                    key,
                    snapshot
                );
            }
            self.notify(&key, &snapshot);
        }
    }

    fn notify(&self, key: &str, snapshot: &PerformanceSnapshot) {
        let Some(handler) = &self.settings.snapshot_handler else {
            return;
        };
        let context = SnapshotContext {
            aggregator: &self.name,
            key,
            snapshot,
            scheduler: &self.scheduler,
            task_name: &self.task_name,
            owns_task: &self.owns_task,
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&context))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                "{}: snapshot handler failed for key '{}': {:?}",
                self.name, key, e
            ),
            Err(payload) => error!(
                "{}: snapshot handler panicked for key '{}': {}",
                self.name,
                key,
                panic_message(payload)
            ),
        }
    }
}

impl Inner {
    fn stop_owned_task(&self) -> bool {
        self.owns_task.swap(false, Ordering::SeqCst) && self.scheduler.stop_task(&self.task_name)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // a same-named task registered by another aggregator is left alone
        self.stop_owned_task();
    }
}

/// Concurrent per-key throughput and latency aggregator.
///
/// Producers record units with [`increment_key_count`](Self::increment_key_count)
/// or [`update_key_count`](Self::update_key_count) from any number of tasks or
/// threads. After [`start`](Self::start), one scheduler task named
/// `"<name>.task"` sweeps every key on the configured interval, derives a
/// [`PerformanceSnapshot`], logs it when auto-logging is on and passes it to
/// the snapshot handler.
///
/// `PerformanceAggregator` is cheap to clone; clones share the same counters.
/// Dropping the last clone stops its recomputation task.
///
/// # Example
///
/// ```rust,no_run
/// use perfdrive::{AggregatorSettings, PerformanceAggregator, Scheduler};
///
/// # async fn example() -> perfdrive::Result<()> {
/// let aggregator = PerformanceAggregator::new(
///     "checkout",
///     AggregatorSettings::default(),
///     Scheduler::new(),
/// )?;
/// aggregator.start()?;
///
/// aggregator.increment_key_count("checkout.submit", 12.5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PerformanceAggregator {
    inner: Arc<Inner>,
}

impl fmt::Debug for PerformanceAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceAggregator")
            .field("name", &self.inner.name)
            .field("task_name", &self.inner.task_name)
            .field("settings", &self.inner.settings)
            .field("keys", &self.keys())
            .finish()
    }
}

impl PerformanceAggregator {
    /// Creates an aggregator whose recomputation will run on `scheduler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// `name` is blank or the settings carry a zero delay or interval.
    pub fn new(
        name: impl Into<String>,
        settings: AggregatorSettings,
        scheduler: Scheduler,
    ) -> Result<Self> {
        let name = name.into();
        ensure_not_blank("name", &name)?;
        settings.validate()?;

        let task_name = Self::task_name_for(&name);
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                task_name,
                settings,
                scheduler,
                owns_task: AtomicBool::new(false),
                counters: RwLock::new(HashMap::new()),
            }),
        })
    }

    fn task_name_for(name: &str) -> String {
        format!("{name}.task")
    }

    /// Name prefixed to every automatic log line.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the scheduler task that drives recomputation.
    pub fn task_name(&self) -> &str {
        &self.inner.task_name
    }

    /// Settings this aggregator was created with.
    pub fn settings(&self) -> &AggregatorSettings {
        &self.inner.settings
    }

    /// Starts periodic recomputation.
    ///
    /// Returns `Ok(false)` if recomputation is already running, or if the
    /// scheduler already holds a task with this aggregator's task name. In the
    /// latter case the existing task is untouched and this aggregator never
    /// ticks.
    pub fn start(&self) -> Result<bool> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let started = self.inner.scheduler.start_task(
            self.inner.task_name.clone(),
            self.inner.settings.initial_delay,
            self.inner.settings.interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.recompute_all();
                    }
                    Ok(())
                }
            },
        )?;
        if started {
            self.inner.owns_task.store(true, Ordering::SeqCst);
            debug!("Aggregator '{}' started recomputation.", self.inner.name);
        }
        Ok(started)
    }

    /// Stops periodic recomputation. Returns `false` if this aggregator was
    /// not running it.
    pub fn stop(&self) -> bool {
        self.inner.stop_owned_task()
    }

    /// Returns true while this aggregator's recomputation task is registered.
    pub fn is_running(&self) -> bool {
        self.inner.owns_task.load(Ordering::SeqCst)
            && self.inner.scheduler.is_scheduled(&self.inner.task_name)
    }

    /// Records one unit for `key` that took `rt_millis` milliseconds.
    ///
    /// Creates the key on first use. Safe to call concurrently for the same
    /// or different keys.
    pub fn increment_key_count(&self, key: &str, rt_millis: f64) {
        self.inner.record(
            key,
            |counter| counter.increment(rt_millis),
            || CounterState::new(1, rt_millis),
        );
    }

    /// Sets the absolute count for `key` and adds `rt_millis` to its response time.
    ///
    /// Unlike [`increment_key_count`](Self::increment_key_count) this
    /// overwrites the count. Mixing both on one key is allowed; keeping the
    /// numbers meaningful is up to the caller.
    pub fn update_key_count(&self, key: &str, count: u64, rt_millis: f64) {
        self.inner.record(
            key,
            |counter| counter.update(count, rt_millis),
            || CounterState::new(count, rt_millis),
        );
    }

    /// Returns the snapshot derived for `key` on the most recent tick.
    ///
    /// `None` if the key is unknown or has not been through a tick yet.
    pub fn key_performance(&self, key: &str) -> Option<PerformanceSnapshot> {
        self.inner.counter(key)?.last_snapshot()
    }

    /// Returns the live cumulative count for `key` without waiting for a tick.
    pub fn key_total_count(&self, key: &str) -> Option<u64> {
        self.inner.counter(key).map(|counter| counter.total_count())
    }

    /// Returns every recorded key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.counters().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub(crate) fn recompute_all(&self) {
        self.inner.recompute_all();
    }
}
