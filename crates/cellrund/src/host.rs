//! Runtime host — runs the runtime again and again until told to stop.
//!
//! | Runtime exit | Host |
//! |---|---|
//! | `Stopped` | exit |
//! | `Restart` | wait `restart_delay`, run again |
//! | `TriggerRestart` | run again immediately |
//!
//! A shutdown signal stops the runtime currently executing and ends the
//! host once that runtime has finalized.

use std::sync::Arc;

use cellrun_runtime::{
    Runtime, RuntimeExit, RuntimeFinalizer, RuntimeObserver, ServiceLoader, WorkerConfig,
};
use cellrun_storage::StorageProviders;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Host {
    config: WorkerConfig,
    storage: StorageProviders,
    loader: Arc<dyn ServiceLoader>,
    observer: Option<Arc<dyn RuntimeObserver>>,
    finalizers: Vec<Arc<dyn RuntimeFinalizer>>,
}

/// What the host did before exiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    pub executions: u32,
    pub restarts: u32,
    pub triggered_restarts: u32,
}

impl Host {
    pub fn new(config: WorkerConfig, storage: StorageProviders, loader: Arc<dyn ServiceLoader>) -> Self {
        Self {
            config,
            storage,
            loader,
            observer: None,
            finalizers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RuntimeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_finalizer(mut self, finalizer: Arc<dyn RuntimeFinalizer>) -> Self {
        self.finalizers.push(finalizer);
        self
    }

    fn build_runtime(&self) -> Runtime {
        let mut runtime = Runtime::new(self.config.worker_name.clone(), self.storage.clone())
            .with_scheduler_config(self.config.scheduler.to_scheduler_config());
        for finalizer in &self.finalizers {
            runtime = runtime.with_finalizer(Arc::clone(finalizer));
        }
        if let Some(observer) = &self.observer {
            runtime = runtime.with_observer(Arc::clone(observer));
        }
        runtime
    }

    /// Run until a runtime exits `Stopped` or `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> HostSummary {
        let worker = self.config.worker_name.as_str();
        let restart_delay = self.config.runtime.restart_delay();
        let mut summary = HostSummary::default();

        loop {
            let runtime = self.build_runtime();
            let watcher = {
                let handle = runtime.handle();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if shutdown.wait_for(|requested| *requested).await.is_ok() {
                        handle.stop();
                    }
                })
            };

            summary.executions += 1;
            let result = runtime.execute(self.loader.as_ref()).await;
            watcher.abort();

            if *shutdown.borrow() {
                info!(%worker, "shutdown requested, host exiting");
                return summary;
            }

            match result {
                Ok(RuntimeExit::Stopped) => {
                    info!(%worker, "runtime stopped, host exiting");
                    return summary;
                }
                Ok(RuntimeExit::Restart) => {
                    summary.restarts += 1;
                    warn!(%worker, delay = ?restart_delay, "runtime exited for restart");
                    tokio::select! {
                        _ = tokio::time::sleep(restart_delay) => {}
                        _ = shutdown.wait_for(|requested| *requested) => {
                            info!(%worker, "shutdown requested during restart delay, host exiting");
                            return summary;
                        }
                    }
                }
                Err(trigger) => {
                    summary.triggered_restarts += 1;
                    info!(%worker, reason = %trigger.reason, "restart triggered, restarting now");
                }
            }
        }
    }
}
