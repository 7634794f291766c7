//! Scheduling and lifecycle events, and the boundary that delivers them.
//!
//! Observers are diagnostics only. A panicking observer is caught and
//! logged at [`notify_observer`]; it never changes what the scheduler or
//! the runtime does next.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use cellrun_service::ServiceFeedback;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    RuntimeStarted {
        worker: String,
        services: usize,
    },
    RuntimeStopped {
        worker: String,
        restart: bool,
    },
    ServiceExecuted {
        service: String,
        feedback: ServiceFeedback,
        elapsed: Duration,
    },
    ExecutionFailed {
        worker: String,
        /// Last unit known to be executing, if any.
        service: Option<String>,
        kind: &'static str,
        message: String,
    },
    /// A full round did no work; the scheduler is about to wait.
    SchedulerIdle {
        sleep: Duration,
    },
}

/// Sink for [`RuntimeEvent`]s.
pub trait RuntimeObserver: Send + Sync {
    fn notify(&self, event: &RuntimeEvent);
}

/// Deliver `event`, swallowing anything the observer throws.
pub fn notify_observer(observer: Option<&Arc<dyn RuntimeObserver>>, event: &RuntimeEvent) {
    let Some(observer) = observer else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| observer.notify(event))).is_err() {
        warn!(?event, "runtime observer panicked, event dropped");
    }
}

/// Renders every event as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RuntimeObserver for TracingObserver {
    fn notify(&self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::RuntimeStarted { worker, services } => {
                info!(%worker, services, "runtime started");
            }
            RuntimeEvent::RuntimeStopped { worker, restart } => {
                info!(%worker, restart, "runtime stopped");
            }
            RuntimeEvent::ServiceExecuted {
                service,
                feedback,
                elapsed,
            } => {
                debug!(%service, ?feedback, ?elapsed, "service executed");
            }
            RuntimeEvent::ExecutionFailed {
                worker,
                service,
                kind,
                message,
            } => {
                warn!(%worker, service = service.as_deref().unwrap_or("-"), kind, %message, "execution failed");
            }
            RuntimeEvent::SchedulerIdle { sleep } => {
                debug!(?sleep, "scheduler idle");
            }
        }
    }
}
