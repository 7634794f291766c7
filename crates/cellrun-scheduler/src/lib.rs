//! cellrun-scheduler — decides which service unit runs next.
//!
//! A [`Scheduler`] is built from the service units, a run function and an
//! optional observer. [`Scheduler::schedule`] yields a [`Schedule`]: a lazy,
//! possibly unbounded sequence of [`ScheduledAction`]s that the runtime
//! pulls one at a time.
//!
//! ```text
//! Scheduler
//!   ├── schedule() → Schedule
//!   │     └── next_action().await → ScheduledAction
//!   │           └── run().await → ServiceFeedback | ExecutionError
//!   └── handle() → SchedulerHandle
//!         ├── currently_scheduled()
//!         └── abort_waiting()
//! ```

pub mod observer;
pub mod scheduler;

pub use observer::{RuntimeEvent, RuntimeObserver, TracingObserver, notify_observer};
pub use scheduler::{
    RunFn, Schedule, ScheduledAction, Scheduler, SchedulerConfig, SchedulerHandle, start_unit,
};
