// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Named Recurring Tasks
//!
//! The [`Scheduler`] owns a registry of named tasks. Each task is a single
//! tokio task that sleeps for the due time, fires its action, then sleeps for
//! the period before firing again. Because the sleep only starts after the
//! action returns, a slow action delays the next firing instead of
//! overlapping with it.
//!
//! # Lifecycle
//!
//! ```text
//! start_task ──► Idle ──(fire)──► Running ──(return / error / panic)──► Idle ...
//!                  │                  │
//!                  └──── stop_task ───┴──► Stopped (unregistered, loop exits)
//! ```
//!
//! - Starting a name that is already registered is a no-op; the existing
//!   action and interval are kept.
//! - Stopping an unknown or already stopped name is a no-op.
//! - Errors and panics raised by an action are logged and the task keeps its
//!   schedule.
//! - Stopping never interrupts an action that is already running; it only
//!   prevents the next firing. An action may stop its own task.
//!
//! # Example
//!
//! ```rust,no_run
//! use perfdrive::Scheduler;
//! use std::time::Duration;
//!
//! # async fn example() -> perfdrive::Result<()> {
//! let scheduler = Scheduler::new();
//! scheduler.start_task("heartbeat", Duration::from_secs(1), Duration::from_secs(1), || async {
//!     log::info!("tick");
//!     Ok(())
//! })?;
//!
//! // ... later
//! scheduler.stop_task("heartbeat");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, trace};
use tokio::sync::Notify;

use crate::error::{ensure_nonzero, ensure_not_blank, panic_message, Error, Result};

/// Observable state of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its next firing.
    Idle,
    /// The action is currently executing.
    Running,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => write!(f, "Idle"),
            TaskState::Running => write!(f, "Running"),
        }
    }
}

/// Shared control block between the registry and a task loop.
#[derive(Debug)]
struct TaskControl {
    name: String,
    due_time: Duration,
    period: Duration,
    stopped: AtomicBool,
    running: AtomicBool,
    wake: Notify,
}

impl TaskControl {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is between sleeps
        self.wake.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn state(&self) -> TaskState {
        if self.running.load(Ordering::SeqCst) {
            TaskState::Running
        } else {
            TaskState::Idle
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    tasks: Mutex<HashMap<String, Arc<TaskControl>>>,
}

impl Registry {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Arc<TaskControl>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `control` as running if it is still the live registration for its name.
    fn begin_firing(&self, control: &Arc<TaskControl>) -> bool {
        let tasks = self.tasks();
        if control.is_stopped() {
            return false;
        }
        match tasks.get(&control.name) {
            Some(current) if Arc::ptr_eq(current, control) => {
                control.running.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, control) in tasks.drain() {
            control.stop();
        }
    }
}

/// Registry of named, non-overlapping recurring tasks.
///
/// `Scheduler` is cheap to clone; all clones share one registry. When the last
/// clone is dropped every registered task is stopped.
#[derive(Clone, Default)]
pub struct Scheduler {
    registry: Arc<Registry>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.task_names())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler with no registered tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers and starts a named recurring task.
    ///
    /// The action first fires after `due_time`, then `period` after each
    /// completion. Must be called from within a tokio runtime.
    ///
    /// Returns `Ok(true)` if the task was registered and `Ok(false)` if a task
    /// with the same name already exists, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `name` is blank or either duration is zero.
    /// * [`Error::NoRuntime`] if called outside a tokio runtime.
    pub fn start_task<F, Fut>(
        &self,
        name: impl Into<String>,
        due_time: Duration,
        period: Duration,
        action: F,
    ) -> Result<bool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        ensure_not_blank("name", &name)?;
        ensure_nonzero("due_time", due_time)?;
        ensure_nonzero("period", period)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime {
            operation: "start_task",
        })?;

        let mut tasks = self.registry.tasks();
        if tasks.contains_key(&name) {
            debug!("Task '{}' is already registered; start request ignored.", name);
            return Ok(false);
        }

        let control = Arc::new(TaskControl {
            name: name.clone(),
            due_time,
            period,
            stopped: AtomicBool::new(false),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        });
        tasks.insert(name.clone(), control.clone());
        runtime.spawn(run_task(Arc::downgrade(&self.registry), control, action));

        info!(
            "Task '{}' started (due: {:?}, period: {:?}).",
            name, due_time, period
        );
        Ok(true)
    }

    /// Stops and unregisters a task.
    ///
    /// An action that is already executing runs to completion; no further
    /// firings happen. Returns `false` if no task with that name was registered.
    pub fn stop_task(&self, name: &str) -> bool {
        let removed = self.registry.tasks().remove(name);
        match removed {
            Some(control) => {
                control.stop();
                info!("Task '{}' stopped.", name);
                true
            }
            None => {
                debug!("Task '{}' is not registered; stop request ignored.", name);
                false
            }
        }
    }

    /// Returns true if a task with the given name is registered.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.registry.tasks().contains_key(name)
    }

    /// Returns the state of a registered task, or `None` if it is not registered.
    pub fn task_state(&self, name: &str) -> Option<TaskState> {
        self.registry.tasks().get(name).map(|control| control.state())
    }

    /// Returns the names of all registered tasks, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.tasks().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every registered task. Returns how many were stopped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Arc<TaskControl>> = self
            .registry
            .tasks()
            .drain()
            .map(|(_, control)| control)
            .collect();
        for control in &drained {
            control.stop();
        }
        if !drained.is_empty() {
            info!("Scheduler shut down {} task(s).", drained.len());
        }
        drained.len()
    }
}

async fn run_task<F, Fut>(registry: Weak<Registry>, control: Arc<TaskControl>, action: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut delay = control.due_time;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = control.wake.notified() => {}
        }

        let fired = match registry.upgrade() {
            Some(registry) => registry.begin_firing(&control),
            None => false,
        };
        if !fired {
            break;
        }

        trace!("Task '{}' firing.", control.name);
        let outcome = AssertUnwindSafe(async { action().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                "Task '{}' failed (due: {:?}, period: {:?}): {:?}",
                control.name, control.due_time, control.period, e
            ),
            Err(payload) => error!(
                "Task '{}' panicked (due: {:?}, period: {:?}): {}",
                control.name,
                control.due_time,
                control.period,
                panic_message(payload)
            ),
        }
        control.running.store(false, Ordering::SeqCst);

        if control.is_stopped() {
            break;
        }
        delay = control.period;
    }
    debug!("Task '{}' loop exited.", control.name);
}
