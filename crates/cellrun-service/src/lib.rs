//! cellrun-service — the schedulable unit of recurring work.
//!
//! A [`Service`] is application code: a name, declared [`ServiceSettings`]
//! and an async work function returning [`ServiceFeedback`]. The runtime
//! wraps each one in a [`ServiceUnit`], which owns everything around the
//! work function:
//!
//! - the cached `Started`/`Stopped` run-state, refreshed from blob storage
//!   at most once per [`STATE_CHECK_INTERVAL`] and seeded with the declared
//!   default the first time it is missing
//! - the execution guard: the work runs on its own task and is abandoned
//!   (aborted) once the unit's execution timeout elapses
//!
//! Work functions talk to storage through a [`ServiceContext`], which also
//! carries the queue and delayed-queue message helpers.

pub mod context;
pub mod delayed;
pub mod error;
pub mod guard;
pub mod settings;
pub mod state;
pub mod unit;

pub use context::ServiceContext;
pub use delayed::DelayedMessageService;
pub use error::{ExecutionError, Interrupted, TriggerRestart};
pub use guard::run_with_timeout;
pub use settings::{DEFAULT_EXECUTION_TIMEOUT, ServiceSettings};
pub use state::{SERVICE_STATE_CONTAINER, ServiceState, ServiceStateAdmin, service_state_key};
pub use unit::{BoxFuture, STATE_CHECK_INTERVAL, Service, ServiceFeedback, ServiceUnit};
