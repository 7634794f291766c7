//! Bounded-time execution guard.
//!
//! The work runs on its own tokio task while the caller races it against a
//! deadline. When the deadline wins, the task is aborted and abandoned:
//! it stops at its next await point, with no cleanup hook, so work must be
//! safe to resume after an execution that never finished.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

use crate::error::ExecutionError;

/// Aborts the task when dropped, so a caller that stops waiting (timeout,
/// forced cancellation of the caller itself) never leaves work running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `work` for at most `timeout`.
///
/// Errors returned by the work function are mapped through the marker
/// classification of [`ExecutionError`]; a panic becomes
/// [`ExecutionError::Panicked`].
pub async fn run_with_timeout<T, F>(
    service: &str,
    timeout: Duration,
    work: F,
) -> Result<T, ExecutionError>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(work));

    match tokio::time::timeout(timeout, &mut task.0).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(ExecutionError::from_work(service, err)),
        Ok(Err(join_err)) => Err(from_join_error(service, join_err)),
        Err(_elapsed) => {
            warn!(%service, ?timeout, "execution deadline elapsed, abandoning work");
            Err(ExecutionError::TimedOut {
                service: service.to_string(),
                timeout,
            })
        }
    }
}

fn from_join_error(service: &str, err: JoinError) -> ExecutionError {
    if !err.is_panic() {
        return ExecutionError::Aborted;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    ExecutionError::Panicked {
        service: service.to_string(),
        message,
    }
}
