//! Execution errors and the marker errors work functions can raise.

use std::time::Duration;

use cellrun_storage::StorageError;
use thiserror::Error;

/// Everything that can escape a unit's `start()`.
///
/// The runtime loop is the only place these are handled; each variant maps
/// to one row of its classification table.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A blocked wait inside the work function was interrupted.
    #[error("service {service} was interrupted")]
    Interrupted { service: String },

    /// The execution was forcibly cancelled from outside.
    #[error("execution was aborted")]
    Aborted,

    #[error("service {service} timed out after {timeout:?}")]
    TimedOut { service: String, timeout: Duration },

    /// Explicit request to restart the worker, owned by the host.
    #[error(transparent)]
    TriggerRestart(#[from] TriggerRestart),

    #[error("service {service} panicked: {message}")]
    Panicked { service: String, message: String },

    #[error("service {service} failed: {source:#}")]
    Failed {
        service: String,
        source: anyhow::Error,
    },

    #[error("service state error: {0}")]
    Storage(#[from] StorageError),
}

impl ExecutionError {
    /// Short fault-type label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Interrupted { .. } => "interrupted",
            ExecutionError::Aborted => "aborted",
            ExecutionError::TimedOut { .. } => "timed_out",
            ExecutionError::TriggerRestart(_) => "trigger_restart",
            ExecutionError::Panicked { .. } => "panicked",
            ExecutionError::Failed { .. } => "failed",
            ExecutionError::Storage(_) => "storage",
        }
    }

    /// Map an error returned by a work function, recognizing the marker
    /// errors [`TriggerRestart`] and [`Interrupted`].
    pub(crate) fn from_work(service: &str, err: anyhow::Error) -> Self {
        let err = match err.downcast::<TriggerRestart>() {
            Ok(restart) => return ExecutionError::TriggerRestart(restart),
            Err(err) => err,
        };
        if err.is::<Interrupted>() {
            return ExecutionError::Interrupted {
                service: service.to_string(),
            };
        }
        ExecutionError::Failed {
            service: service.to_string(),
            source: err,
        }
    }
}

/// Raised by a work function to ask the host to restart the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("restart requested: {reason}")]
pub struct TriggerRestart {
    pub reason: String,
}

impl TriggerRestart {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Raised by a work function whose blocking wait was interrupted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("wait interrupted")]
pub struct Interrupted;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_errors_are_classified_by_marker() {
        let err = ExecutionError::from_work("svc", TriggerRestart::new("new package").into());
        assert!(matches!(err, ExecutionError::TriggerRestart(ref t) if t.reason == "new package"));

        let err = ExecutionError::from_work("svc", Interrupted.into());
        assert!(matches!(err, ExecutionError::Interrupted { ref service } if service == "svc"));

        let err = ExecutionError::from_work("svc", anyhow::anyhow!("disk full"));
        assert_eq!(err.kind(), "failed");
        assert_eq!(err.to_string(), "service svc failed: disk full");
    }

    #[test]
    fn context_wrapped_markers_are_still_recognized() {
        let err = anyhow::Error::from(TriggerRestart::new("upgrade")).context("while polling");
        let err = ExecutionError::from_work("svc", err);
        assert!(matches!(err, ExecutionError::TriggerRestart(_)));
    }
}
