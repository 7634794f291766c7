//! Runtime loop — one long-lived execution of the loaded services.
//!
//! `execute` loads the application, builds the scheduler and pulls actions
//! until the stop flag is raised, the schedule ends or a fault escapes an
//! action. Faults are classified (see [`crate::classify`]) into the
//! [`RuntimeExit`] handed back to the host. Finalizers run on every exit
//! path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cellrun_scheduler::{
    RuntimeEvent, RuntimeObserver, Scheduler, SchedulerConfig, SchedulerHandle, notify_observer,
    start_unit,
};
use cellrun_service::{ExecutionError, ServiceContext, ServiceUnit, TriggerRestart};
use cellrun_storage::StorageProviders;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classify::{Disposition, classify, is_expected};
use crate::loader::{Application, RuntimeFinalizer, ServiceLoader};

/// How a runtime execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeExit {
    /// Stop requested, forced abort, or nothing left to schedule.
    Stopped,
    /// A fault tore the runtime down; the host should run it again.
    Restart,
}

/// Control state shared between the loop and its handles.
struct RuntimeControl {
    stop_requested: AtomicBool,
    /// True while `execute` is running; stop then aborts it outright.
    executing: AtomicBool,
    abort: watch::Sender<bool>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl RuntimeControl {
    fn scheduler(&self) -> MutexGuard<'_, Option<SchedulerHandle>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stops a runtime from another task.
#[derive(Clone)]
pub struct RuntimeHandle {
    worker: String,
    control: Arc<RuntimeControl>,
}

impl RuntimeHandle {
    /// Raise the stop flag. While the loop is executing this also aborts
    /// whatever it is doing, including the unit mid-run; otherwise it only
    /// cuts short a pending scheduler wait.
    pub fn stop(&self) {
        let control = &self.control;
        control.stop_requested.store(true, Ordering::SeqCst);
        debug!(worker = %self.worker, "runtime stop requested");

        if control.executing.load(Ordering::SeqCst) {
            control.abort.send_replace(true);
            return;
        }
        if let Some(scheduler) = control.scheduler().as_ref() {
            scheduler.abort_waiting();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.control.stop_requested.load(Ordering::SeqCst)
    }

    /// Unit mid-execution, or the last one known to have run.
    pub fn current_service(&self) -> Option<String> {
        self.control
            .scheduler()
            .as_ref()
            .and_then(SchedulerHandle::currently_scheduled)
    }
}

pub struct Runtime {
    worker: String,
    storage: StorageProviders,
    scheduler_config: SchedulerConfig,
    finalizers: Vec<Arc<dyn RuntimeFinalizer>>,
    observer: Option<Arc<dyn RuntimeObserver>>,
    control: Arc<RuntimeControl>,
}

/// Why the loop left.
enum Fault {
    Load(anyhow::Error),
    Execution(ExecutionError),
}

impl Runtime {
    pub fn new(worker: impl Into<String>, storage: StorageProviders) -> Self {
        let (abort, _) = watch::channel(false);
        Self {
            worker: worker.into(),
            storage,
            scheduler_config: SchedulerConfig::default(),
            finalizers: Vec::new(),
            observer: None,
            control: Arc::new(RuntimeControl {
                stop_requested: AtomicBool::new(false),
                executing: AtomicBool::new(false),
                abort,
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Runtime-level finalizer, run before the application's own.
    pub fn with_finalizer(mut self, finalizer: Arc<dyn RuntimeFinalizer>) -> Self {
        self.finalizers.push(finalizer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RuntimeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            worker: self.worker.clone(),
            control: Arc::clone(&self.control),
        }
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Run until stopped or torn down by a fault.
    ///
    /// A [`TriggerRestart`] raised by a work function is returned as the
    /// error, untouched, for the host to act on.
    pub async fn execute(&self, loader: &dyn ServiceLoader) -> Result<RuntimeExit, TriggerRestart> {
        let worker = self.worker.as_str();
        debug!(%worker, "runtime started");
        self.control.executing.store(true, Ordering::SeqCst);

        let mut app = None;
        let outcome = self.run_loop(loader, &mut app).await;
        let service = self.handle().current_service();
        let result = self.conclude(outcome, service);

        debug!(%worker, "runtime stopping");
        self.control.executing.store(false, Ordering::SeqCst);
        self.finalize(app);
        self.control.scheduler().take();

        let restart = !matches!(result, Ok(RuntimeExit::Stopped));
        notify_observer(
            self.observer.as_ref(),
            &RuntimeEvent::RuntimeStopped {
                worker: worker.to_string(),
                restart,
            },
        );
        debug!(%worker, "runtime stopped");
        result
    }

    async fn run_loop(&self, loader: &dyn ServiceLoader, app: &mut Option<Application>) -> Result<(), Fault> {
        let loaded = loader.load(&self.storage).map_err(Fault::Load)?;

        let context = ServiceContext::new(self.storage.clone());
        let units: Vec<Arc<ServiceUnit>> = loaded
            .services
            .iter()
            .map(|s| {
                Arc::new(ServiceUnit::new(
                    Arc::clone(&s.service),
                    s.settings,
                    context.clone(),
                ))
            })
            .collect();
        info!(worker = %self.worker, services = ?loaded.service_names(), "application loaded");
        *app = Some(loaded);

        let scheduler = Scheduler::new(units, start_unit(), self.observer.clone())
            .with_config(self.scheduler_config);
        *self.control.scheduler() = Some(scheduler.handle());
        notify_observer(
            self.observer.as_ref(),
            &RuntimeEvent::RuntimeStarted {
                worker: self.worker.clone(),
                services: scheduler.units().len(),
            },
        );

        let mut abort = self.control.abort.subscribe();
        let mut schedule = scheduler.schedule();
        loop {
            if self.control.stop_requested.load(Ordering::SeqCst) {
                debug!(worker = %self.worker, "stop requested, no further actions");
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = aborted(&mut abort) => return Err(Fault::Execution(ExecutionError::Aborted)),
                next = schedule.next_action() => next,
            };
            let Some(action) = next else {
                debug!(worker = %self.worker, "schedule exhausted");
                return Ok(());
            };

            tokio::select! {
                biased;
                _ = aborted(&mut abort) => return Err(Fault::Execution(ExecutionError::Aborted)),
                result = action.run() => {
                    result.map_err(Fault::Execution)?;
                }
            }
        }
    }

    fn conclude(&self, outcome: Result<(), Fault>, service: Option<String>) -> Result<RuntimeExit, TriggerRestart> {
        let worker = self.worker.as_str();
        let service_name = service.as_deref().unwrap_or("unknown");

        let err = match outcome {
            Ok(()) => return Ok(RuntimeExit::Stopped),
            Err(Fault::Load(err)) => {
                error!(%worker, error = %format!("{err:#}"), "application failed to load, runtime will restart");
                self.report_failure(None, "load", format!("{err:#}"));
                return Ok(RuntimeExit::Restart);
            }
            Err(Fault::Execution(err)) => err,
        };

        self.report_failure(service.clone(), err.kind(), err.to_string());
        match classify(&err) {
            Disposition::Stop => {
                self.control.abort.send_replace(false);
                debug!(%worker, service = %service_name, "execution aborted, runtime is stopping");
                Ok(RuntimeExit::Stopped)
            }
            Disposition::Propagate => match err {
                ExecutionError::TriggerRestart(restart) => {
                    info!(%worker, service = %service_name, reason = %restart.reason, "restart triggered");
                    Err(restart)
                }
                _ => Ok(RuntimeExit::Restart),
            },
            Disposition::Restart if is_expected(&err) => {
                warn!(%worker, service = %service_name, kind = err.kind(), error = %err, "runtime will restart");
                Ok(RuntimeExit::Restart)
            }
            Disposition::Restart => {
                error!(%worker, service = %service_name, kind = err.kind(), error = %err, "unhandled fault, runtime will restart");
                Ok(RuntimeExit::Restart)
            }
        }
    }

    fn report_failure(&self, service: Option<String>, kind: &'static str, message: String) {
        notify_observer(
            self.observer.as_ref(),
            &RuntimeEvent::ExecutionFailed {
                worker: self.worker.clone(),
                service,
                kind,
                message,
            },
        );
    }

    fn finalize(&self, app: Option<Application>) {
        for finalizer in &self.finalizers {
            finalizer.finalize();
        }
        if let Some(app) = app {
            for finalizer in &app.finalizers {
                finalizer.finalize();
            }
            drop(app);
            debug!(worker = %self.worker, "application released");
        }
    }
}

/// Resolves once the abort flag is raised. Never resolves if the sender is
/// gone.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticServiceLoader;
    use cellrun_service::{BoxFuture, Service, ServiceFeedback, ServiceSettings};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Countdown {
        left: AtomicUsize,
    }

    impl Service for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        fn execute(self: Arc<Self>, _ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
            Box::pin(async move {
                if self.left.fetch_sub(1, Ordering::SeqCst) == 1 {
                    return Err(TriggerRestart::new("countdown reached zero").into());
                }
                Ok(ServiceFeedback::DoneForNow)
            })
        }
    }

    #[derive(Default)]
    struct Flag(AtomicBool);

    impl RuntimeFinalizer for Flag {
        fn finalize(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn trigger_restart_reaches_the_caller() {
        let service = Arc::new(Countdown {
            left: AtomicUsize::new(3),
        });
        let loader = StaticServiceLoader::new().with_service(service.clone());
        let finalizer = Arc::new(Flag::default());
        let runtime = Runtime::new("w1", StorageProviders::in_memory()).with_finalizer(finalizer.clone());

        let err = runtime.execute(&loader).await.unwrap_err();
        assert_eq!(err.reason, "countdown reached zero");
        assert_eq!(service.left.load(Ordering::SeqCst), 0);
        assert!(finalizer.0.load(Ordering::SeqCst));
        assert_eq!(runtime.handle().current_service(), None);
    }

    #[tokio::test]
    async fn stop_before_execute_runs_nothing() {
        let service = Arc::new(Countdown {
            left: AtomicUsize::new(100),
        });
        let loader = StaticServiceLoader::new().with_service(service.clone());
        let runtime = Runtime::new("w1", StorageProviders::in_memory());

        runtime.stop();
        assert!(runtime.handle().is_stop_requested());
        assert_eq!(runtime.execute(&loader).await, Ok(RuntimeExit::Stopped));
        assert_eq!(service.left.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_ends_the_wait() {
        struct Idle;

        impl Service for Idle {
            fn name(&self) -> &str {
                "idle"
            }

            fn settings(&self) -> ServiceSettings {
                ServiceSettings::default()
            }

            fn execute(self: Arc<Self>, _ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
                Box::pin(async { Ok(ServiceFeedback::NoWorkAvailable) })
            }
        }

        let loader = StaticServiceLoader::new().with_service(Arc::new(Idle));
        let runtime = Arc::new(
            Runtime::new("w1", StorageProviders::in_memory()).with_scheduler_config(SchedulerConfig {
                idle_sleep: Duration::from_secs(3600),
                time_slice: Duration::from_secs(60),
            }),
        );
        let handle = runtime.handle();

        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.execute(&loader).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();

        assert_eq!(task.await.unwrap(), Ok(RuntimeExit::Stopped));
    }
}
