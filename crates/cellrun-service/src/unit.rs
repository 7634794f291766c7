//! Service trait and the ServiceUnit wrapper the scheduler runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cellrun_storage::BlobStorageExt;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::ServiceContext;
use crate::error::ExecutionError;
use crate::guard::run_with_timeout;
use crate::settings::ServiceSettings;
use crate::state::{ServiceState, service_state_key};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// How often a unit re-reads its durable run-state.
pub const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome a work function reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceFeedback {
    /// The unit is stopped; the work function was not invoked.
    Skipped,
    /// Nothing to do.
    NoWorkAvailable,
    /// Did some work; nothing left for now.
    DoneForNow,
    /// Did some work and more is waiting.
    WorkAvailable,
}

impl ServiceFeedback {
    pub fn did_work(self) -> bool {
        matches!(self, ServiceFeedback::DoneForNow | ServiceFeedback::WorkAvailable)
    }
}

/// Application-level unit of recurring work.
pub trait Service: Send + Sync + 'static {
    /// Identity of the service; also the name of its run-state record.
    fn name(&self) -> &str;

    fn settings(&self) -> ServiceSettings {
        ServiceSettings::default()
    }

    /// One execution. Runs on its own task under the unit's execution
    /// timeout and may be abandoned at any await point.
    fn execute(self: Arc<Self>, ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>>;
}

#[derive(Debug)]
struct RunState {
    state: ServiceState,
    last_check: Option<Instant>,
}

/// A [`Service`] plus its run-state and execution timeout.
pub struct ServiceUnit {
    service: Arc<dyn Service>,
    name: String,
    execution_timeout: Duration,
    default_state: ServiceState,
    check_interval: Duration,
    context: ServiceContext,
    run_state: Mutex<RunState>,
}

impl ServiceUnit {
    pub fn new(service: Arc<dyn Service>, settings: ServiceSettings, context: ServiceContext) -> Self {
        let default_state = settings.default_state();
        Self {
            name: service.name().to_string(),
            service,
            execution_timeout: settings.execution_timeout(),
            default_state,
            check_interval: STATE_CHECK_INTERVAL,
            context,
            run_state: Mutex::new(RunState {
                state: default_state,
                last_check: None,
            }),
        }
    }

    /// Wrap a service using the settings it declares.
    pub fn from_service(service: Arc<dyn Service>, context: ServiceContext) -> Self {
        let settings = service.settings();
        Self::new(service, settings, context)
    }

    pub fn with_state_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    pub fn default_state(&self) -> ServiceState {
        self.default_state
    }

    /// Run-state as of the last check.
    pub fn current_state(&self) -> ServiceState {
        self.lock_run_state().state
    }

    /// Check the run-state, then run the work function under the execution
    /// guard.
    ///
    /// A stopped unit returns [`ServiceFeedback::Skipped`] without invoking
    /// any work. Work that outlives the execution timeout is abandoned and
    /// the call fails with [`ExecutionError::TimedOut`].
    pub async fn start(&self) -> Result<ServiceFeedback, ExecutionError> {
        if self.refresh_state()? == ServiceState::Stopped {
            return Ok(ServiceFeedback::Skipped);
        }

        let work = Arc::clone(&self.service).execute(self.context.clone());
        run_with_timeout(&self.name, self.execution_timeout, work).await
    }

    /// Re-read the durable run-state if the last check is older than the
    /// check interval; seed it with the default when absent.
    fn refresh_state(&self) -> Result<ServiceState, ExecutionError> {
        let now = Instant::now();
        let mut run = self.lock_run_state();

        let due = run
            .last_check
            .is_none_or(|last| now.duration_since(last) > self.check_interval);
        if !due {
            return Ok(run.state);
        }

        let key = service_state_key(&self.name);
        let blobs = &self.context.storage().blobs;
        let state = match blobs.get_value::<ServiceState>(&key)? {
            Some(state) => state,
            None => {
                blobs.put_value(&key, &self.default_state)?;
                info!(service = %self.name, state = ?self.default_state, "service state seeded");
                self.default_state
            }
        };

        if state != run.state {
            debug!(service = %self.name, from = ?run.state, to = ?state, "service state changed");
        }
        run.state = state;
        run.last_check = Some(now);
        Ok(state)
    }

    fn lock_run_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.run_state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ServiceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceUnit")
            .field("name", &self.name)
            .field("execution_timeout", &self.execution_timeout)
            .field("default_state", &self.default_state)
            .finish_non_exhaustive()
    }
}
