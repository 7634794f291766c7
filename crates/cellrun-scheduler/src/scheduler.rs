//! Scheduler — turns a set of service units into a lazy sequence of
//! actions.
//!
//! The runtime pulls one [`ScheduledAction`] at a time from a [`Schedule`]
//! and decides when to stop pulling. Selection is round-robin in the order
//! the units were given:
//!
//! - a unit reporting [`ServiceFeedback::WorkAvailable`] is run again while
//!   its time slice lasts
//! - after a full round in which no unit did any work, the next fetch waits
//!   for the idle sleep; [`SchedulerHandle::abort_waiting`] ends that wait
//!   early without touching an action already handed out

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cellrun_service::{BoxFuture, ExecutionError, ServiceFeedback, ServiceUnit};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::observer::{RuntimeEvent, RuntimeObserver, notify_observer};

/// How an action executes its unit.
pub type RunFn = Arc<
    dyn Fn(Arc<ServiceUnit>) -> BoxFuture<Result<ServiceFeedback, ExecutionError>> + Send + Sync,
>;

/// The run function used by the runtime: the unit's own `start()`.
pub fn start_unit() -> RunFn {
    Arc::new(|unit: Arc<ServiceUnit>| -> BoxFuture<Result<ServiceFeedback, ExecutionError>> {
        Box::pin(async move { unit.start().await })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wait after a round in which nothing did any work.
    pub idle_sleep: Duration,
    /// How long a unit reporting `WorkAvailable` keeps being re-run.
    pub time_slice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(10),
            time_slice: Duration::from_secs(60),
        }
    }
}

/// State shared between the scheduler, its schedules, actions and handles.
#[derive(Default)]
struct Shared {
    /// Name of the unit currently mid-execution.
    current: Mutex<Option<String>>,
    /// Feedback of the last completed action: (unit index, feedback).
    last_outcome: Mutex<Option<(usize, ServiceFeedback)>>,
    wake: Notify,
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_outcome(&self) -> MutexGuard<'_, Option<(usize, ServiceFeedback)>> {
        self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Scheduler {
    units: Arc<[Arc<ServiceUnit>]>,
    run: RunFn,
    observer: Option<Arc<dyn RuntimeObserver>>,
    config: SchedulerConfig,
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        units: Vec<Arc<ServiceUnit>>,
        run: RunFn,
        observer: Option<Arc<dyn RuntimeObserver>>,
    ) -> Self {
        Self {
            units: units.into(),
            run,
            observer,
            config: SchedulerConfig::default(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn units(&self) -> &[Arc<ServiceUnit>] {
        &self.units
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// A fresh sequence of actions, starting from the first unit.
    pub fn schedule(&self) -> Schedule {
        self.shared.last_outcome().take();
        Schedule {
            units: Arc::clone(&self.units),
            run: Arc::clone(&self.run),
            observer: self.observer.clone(),
            config: self.config,
            shared: Arc::clone(&self.shared),
            cursor: 0,
            round_did_work: false,
            slice: None,
        }
    }
}

/// Diagnostics and wait control for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Unit currently mid-execution, if any. After a failed action this is
    /// the unit that failed.
    pub fn currently_scheduled(&self) -> Option<String> {
        self.shared.current().clone()
    }

    /// End an idle wait early. If no fetch is waiting right now, the next
    /// idle wait returns immediately instead.
    pub fn abort_waiting(&self) {
        debug!("scheduler wait aborted");
        self.shared.wake.notify_one();
    }
}

/// Lazy, unbounded sequence of scheduling decisions.
///
/// Empty only when there are no units at all.
pub struct Schedule {
    units: Arc<[Arc<ServiceUnit>]>,
    run: RunFn,
    observer: Option<Arc<dyn RuntimeObserver>>,
    config: SchedulerConfig,
    shared: Arc<Shared>,
    cursor: usize,
    round_did_work: bool,
    /// Unit holding the current time slice and when the slice began.
    slice: Option<(usize, Instant)>,
}

impl Schedule {
    /// Produce the next action. May wait (idle sleep) before returning;
    /// dropping the returned future cancels the wait and nothing else.
    pub async fn next_action(&mut self) -> Option<ScheduledAction> {
        if self.units.is_empty() {
            return None;
        }

        let outcome = self.shared.last_outcome().take();
        if let Some((index, feedback)) = outcome {
            self.round_did_work |= feedback.did_work();
            if !self.keeps_slice(index, feedback) {
                self.advance_from(index).await;
            }
        }

        let index = self.cursor;
        if !matches!(self.slice, Some((i, _)) if i == index) {
            self.slice = Some((index, Instant::now()));
        }
        Some(ScheduledAction {
            index,
            unit: Arc::clone(&self.units[index]),
            run: Arc::clone(&self.run),
            observer: self.observer.clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn keeps_slice(&self, index: usize, feedback: ServiceFeedback) -> bool {
        if feedback != ServiceFeedback::WorkAvailable {
            return false;
        }
        match self.slice {
            Some((i, began)) if i == index => began.elapsed() < self.config.time_slice,
            _ => false,
        }
    }

    async fn advance_from(&mut self, index: usize) {
        self.slice = None;
        self.cursor = index + 1;
        if self.cursor < self.units.len() {
            return;
        }

        self.cursor = 0;
        let idle = !std::mem::take(&mut self.round_did_work);
        if idle {
            self.idle_wait().await;
        }
    }

    async fn idle_wait(&self) {
        let sleep = self.config.idle_sleep;
        notify_observer(self.observer.as_ref(), &RuntimeEvent::SchedulerIdle { sleep });
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = self.shared.wake.notified() => {
                debug!("idle wait cut short");
            }
        }
    }
}

/// One scheduling decision: run one unit once.
pub struct ScheduledAction {
    index: usize,
    unit: Arc<ServiceUnit>,
    run: RunFn,
    observer: Option<Arc<dyn RuntimeObserver>>,
    shared: Arc<Shared>,
}

impl ScheduledAction {
    pub fn service_name(&self) -> &str {
        self.unit.name()
    }

    /// Execute the decision. The unit stays recorded as current if the run
    /// fails or is abandoned part way.
    pub async fn run(self) -> Result<ServiceFeedback, ExecutionError> {
        let name = self.unit.name().to_string();
        *self.shared.current() = Some(name.clone());
        let started = Instant::now();

        let result = (self.run)(Arc::clone(&self.unit)).await;

        let feedback = match &result {
            Ok(feedback) => *feedback,
            Err(_) => ServiceFeedback::NoWorkAvailable,
        };
        *self.shared.last_outcome() = Some((self.index, feedback));

        if let Ok(feedback) = &result {
            self.shared.current().take();
            notify_observer(
                self.observer.as_ref(),
                &RuntimeEvent::ServiceExecuted {
                    service: name,
                    feedback: *feedback,
                    elapsed: started.elapsed(),
                },
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellrun_service::{Service, ServiceContext, TriggerRestart};
    use cellrun_storage::StorageProviders;
    use std::collections::HashMap;

    struct Named(&'static str);

    impl Service for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn execute(self: Arc<Self>, _ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
            Box::pin(async { Ok(ServiceFeedback::DoneForNow) })
        }
    }

    fn units(names: &[&'static str]) -> Vec<Arc<ServiceUnit>> {
        let ctx = ServiceContext::new(StorageProviders::in_memory());
        names
            .iter()
            .map(|&n| Arc::new(ServiceUnit::from_service(Arc::new(Named(n)), ctx.clone())))
            .collect()
    }

    /// Run function answering a fixed feedback per unit, after `delay`.
    fn scripted(answers: &[(&'static str, ServiceFeedback)], delay: Duration) -> RunFn {
        let answers: Arc<HashMap<String, ServiceFeedback>> = Arc::new(
            answers
                .iter()
                .map(|(n, f)| (n.to_string(), *f))
                .collect(),
        );
        Arc::new(move |unit: Arc<ServiceUnit>| -> BoxFuture<Result<ServiceFeedback, ExecutionError>> {
            let answers = Arc::clone(&answers);
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(answers
                    .get(unit.name())
                    .copied()
                    .unwrap_or(ServiceFeedback::DoneForNow))
            })
        })
    }

    async fn run_names(schedule: &mut Schedule, n: usize) -> Vec<String> {
        let mut names = Vec::new();
        for _ in 0..n {
            let action = schedule.next_action().await.unwrap();
            names.push(action.service_name().to_string());
            action.run().await.unwrap();
        }
        names
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RuntimeEvent>>);

    impl RuntimeObserver for Recorder {
        fn notify(&self, event: &RuntimeEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn no_units_means_empty_schedule() {
        let scheduler = Scheduler::new(Vec::new(), start_unit(), None);
        assert!(scheduler.schedule().next_action().await.is_none());
    }

    #[tokio::test]
    async fn units_take_turns_in_order() {
        let scheduler = Scheduler::new(units(&["a", "b", "c"]), scripted(&[], Duration::ZERO), None);
        let mut schedule = scheduler.schedule();
        assert_eq!(run_names(&mut schedule, 5).await, ["a", "b", "c", "a", "b"]);
    }

    #[tokio::test]
    async fn unrun_action_is_handed_out_again() {
        let scheduler = Scheduler::new(units(&["a", "b"]), scripted(&[], Duration::ZERO), None);
        let mut schedule = scheduler.schedule();
        let first = schedule.next_action().await.unwrap();
        drop(first);
        let again = schedule.next_action().await.unwrap();
        assert_eq!(again.service_name(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn work_available_keeps_unit_for_its_time_slice() {
        let run = scripted(&[("a", ServiceFeedback::WorkAvailable)], Duration::from_secs(20));
        let scheduler = Scheduler::new(units(&["a", "b"]), run, None).with_config(SchedulerConfig {
            idle_sleep: Duration::from_secs(10),
            time_slice: Duration::from_secs(60),
        });
        let mut schedule = scheduler.schedule();
        assert_eq!(run_names(&mut schedule, 5).await, ["a", "a", "a", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_round_waits_before_next_round() {
        let recorder = Arc::new(Recorder::default());
        let run = scripted(
            &[
                ("a", ServiceFeedback::NoWorkAvailable),
                ("b", ServiceFeedback::Skipped),
            ],
            Duration::ZERO,
        );
        let scheduler = Scheduler::new(units(&["a", "b"]), run, Some(recorder.clone() as Arc<dyn RuntimeObserver>));
        let mut schedule = scheduler.schedule();

        let began = Instant::now();
        assert_eq!(run_names(&mut schedule, 2).await, ["a", "b"]);
        assert_eq!(began.elapsed(), Duration::ZERO);

        let action = schedule.next_action().await.unwrap();
        assert_eq!(action.service_name(), "a");
        assert!(began.elapsed() >= Duration::from_secs(10));
        assert!(
            recorder
                .0
                .lock()
                .unwrap()
                .contains(&RuntimeEvent::SchedulerIdle {
                    sleep: Duration::from_secs(10)
                })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn busy_round_does_not_wait() {
        let run = scripted(&[("a", ServiceFeedback::NoWorkAvailable)], Duration::ZERO);
        let scheduler = Scheduler::new(units(&["a", "b"]), run, None);
        let mut schedule = scheduler.schedule();

        let began = Instant::now();
        run_names(&mut schedule, 3).await;
        assert_eq!(began.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn abort_waiting_ends_idle_wait() {
        let run = scripted(&[("a", ServiceFeedback::NoWorkAvailable)], Duration::ZERO);
        let scheduler = Scheduler::new(units(&["a"]), run, None).with_config(SchedulerConfig {
            idle_sleep: Duration::from_secs(3600),
            time_slice: Duration::from_secs(60),
        });
        let handle = scheduler.handle();
        let mut schedule = scheduler.schedule();
        run_names(&mut schedule, 1).await;

        let fetch = tokio::spawn(async move { schedule.next_action().await.is_some() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort_waiting();

        let fetched = tokio::time::timeout(Duration::from_secs(5), fetch)
            .await
            .expect("idle wait was not aborted")
            .unwrap();
        assert!(fetched);
    }

    #[tokio::test]
    async fn current_unit_is_visible_while_running() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let run: RunFn = {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            Arc::new(move |_unit: Arc<ServiceUnit>| -> BoxFuture<Result<ServiceFeedback, ExecutionError>> {
                let gate = Arc::clone(&gate);
                let entered = Arc::clone(&entered);
                Box::pin(async move {
                    entered.notify_one();
                    gate.notified().await;
                    Ok(ServiceFeedback::DoneForNow)
                })
            })
        };
        let scheduler = Scheduler::new(units(&["a"]), run, None);
        let handle = scheduler.handle();
        let action = scheduler.schedule().next_action().await.unwrap();
        assert_eq!(handle.currently_scheduled(), None);

        let task = tokio::spawn(action.run());
        entered.notified().await;
        assert_eq!(handle.currently_scheduled().as_deref(), Some("a"));

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert_eq!(handle.currently_scheduled(), None);
    }

    #[tokio::test]
    async fn failed_unit_stays_current_and_error_passes_through() {
        let run: RunFn = Arc::new(|_unit: Arc<ServiceUnit>| -> BoxFuture<Result<ServiceFeedback, ExecutionError>> {
            Box::pin(async { Err(ExecutionError::TriggerRestart(TriggerRestart::new("deploy"))) })
        });
        let scheduler = Scheduler::new(units(&["a", "b"]), run, None);
        let handle = scheduler.handle();
        let mut schedule = scheduler.schedule();

        let err = schedule.next_action().await.unwrap().run().await.unwrap_err();
        assert!(matches!(err, ExecutionError::TriggerRestart(_)));
        assert_eq!(handle.currently_scheduled().as_deref(), Some("a"));
        assert_eq!(schedule.next_action().await.unwrap().service_name(), "b");
    }

    #[tokio::test]
    async fn executions_are_reported_to_the_observer() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(units(&["a"]), scripted(&[], Duration::ZERO), Some(recorder.clone() as Arc<dyn RuntimeObserver>));
        let mut schedule = scheduler.schedule();
        run_names(&mut schedule, 1).await;

        let events = recorder.0.lock().unwrap();
        assert!(matches!(
            events.as_slice(),
            [RuntimeEvent::ServiceExecuted { service, feedback: ServiceFeedback::DoneForNow, .. }] if service == "a"
        ));
    }

    #[tokio::test]
    async fn start_unit_runs_the_service() {
        let scheduler = Scheduler::new(units(&["a"]), start_unit(), None);
        let feedback = scheduler.schedule().next_action().await.unwrap().run().await.unwrap();
        assert_eq!(feedback, ServiceFeedback::DoneForNow);
    }
}
