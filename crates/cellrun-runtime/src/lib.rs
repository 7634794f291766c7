//! cellrun-runtime — the loop that keeps a worker's services running.
//!
//! # Architecture
//!
//! ```text
//! Runtime::execute(loader)
//!   ├── ServiceLoader::load → Application (services + finalizers)
//!   ├── ServiceUnit per service (run-state, execution timeout)
//!   ├── Scheduler → Schedule → ScheduledAction::run, one at a time
//!   ├── classify(fault) → Restart | Stop | Propagate
//!   └── finally: runtime finalizers, application finalizers, release
//! ```
//!
//! A single execution runs at most one action at a time. The host decides
//! what to do with the [`RuntimeExit`]; a `TriggerRestart` raised by a work
//! function is returned as the error of [`Runtime::execute`].

pub mod classify;
pub mod config;
pub mod loader;
pub mod runtime;

pub use classify::{Disposition, classify};
pub use config::{RuntimeSection, SchedulerSection, ServiceOverrides, WorkerConfig};
pub use loader::{Application, LoadedService, RuntimeFinalizer, ServiceLoader, StaticServiceLoader};
pub use runtime::{Runtime, RuntimeExit, RuntimeHandle};

pub use cellrun_scheduler::{RuntimeEvent, RuntimeObserver, SchedulerConfig, TracingObserver};
