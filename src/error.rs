// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug)]
/// Represents errors that can occur while driving a load run.
///
/// Argument errors are raised before any work is scheduled. Work and join
/// errors are raised by [`Dispatcher::dispatch`](crate::Dispatcher::dispatch)
/// once every worker has finished its partition.
pub enum Error {
    /// A caller-supplied argument failed validation
    InvalidArgument {
        /// Name of the offending argument
        name: &'static str,
        /// Why the value was rejected
        details: String,
    },
    /// A background task was requested outside of a tokio runtime
    NoRuntime {
        /// The operation that needed the runtime (e.g., "start_task")
        operation: &'static str,
    },
    /// A unit of work returned an error, ending its worker's loop
    Work {
        /// Index of the worker whose invocation failed
        worker: usize,
        /// Invocations that worker completed before the failure
        completed: usize,
        /// The error returned by the unit of work
        source: anyhow::Error,
    },
    /// A worker task panicked or was cancelled
    Join {
        /// Index of the worker task
        worker: usize,
        /// The original JoinError from tokio
        source: tokio::task::JoinError,
    },
}

impl Error {
    pub(crate) fn invalid_argument(name: &'static str, details: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            details: details.into(),
        }
    }

    /// Returns true if this error was raised by argument validation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument { name, details } => {
                write!(f, "Invalid argument '{name}': {details}")
            }
            Error::NoRuntime { operation } => {
                write!(f, "{operation} requires a running tokio runtime")
            }
            Error::Work {
                worker,
                completed,
                source,
            } => {
                write!(
                    f,
                    "Unit of work failed on worker {worker} after {completed} invocation(s): {source}"
                )
            }
            Error::Join { worker, source } => {
                write!(f, "Failed to join worker {worker}: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Work { source, .. } => Some(&**source),
            Error::Join { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A Result type specialized for perfdrive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Rejects a zero count.
pub(crate) fn ensure_positive(name: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::invalid_argument(name, "must be greater than zero"));
    }
    Ok(())
}

/// Rejects a zero duration.
pub(crate) fn ensure_nonzero(name: &'static str, value: std::time::Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::invalid_argument(name, "duration must be greater than zero"));
    }
    Ok(())
}

/// Rejects an empty or whitespace-only string.
pub(crate) fn ensure_not_blank(name: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(name, "must not be empty"));
    }
    Ok(())
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            _ => "Unknown panic occurred which couldn't be coerced to a string".to_string(),
        },
    }
}
