//! Schedule Executor (C7): dispatches one [`crate::schedule::Schedule`]
//! onto resources, entry by entry, and tells the [`crate::computer::Computer`]
//! when a resource falls idle so it can factor that into the next
//! computation.
//!
//! Grounded in `CScheduleExecutorMain::manageResources`: per resource, the
//! decision is "start the next entry", "the running task already matches
//! the schedule's head entry, leave it", "the checkpoint target for the
//! running task changed, resend START", "the schedule wants a different
//! task here, suspend the current one first", or "nothing ready yet,
//! dependencies unmet". Only the threading primitives change (`tokio::sync::
//! Notify` instead of a condvar-driven worker thread).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};

use tracing::{debug, info, warn};

use crate::computer::Computer;
use crate::event_log;
use crate::resource::ResourceCoordinator;
use crate::schedule::Schedule;
use crate::task::{ResourceId, TaskId};
use crate::task_database::TaskDatabase;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Dispatching,
    Suspending,
}

struct Inner {
    schedule: Option<Arc<Schedule>>,
    /// Per resource: the index into `schedule.entries` currently assigned to
    /// it — either dispatched and running, or the next one waiting on
    /// dependencies. Advances only once an entry is consumed (its task goes
    /// terminal), never merely because it was dispatched.
    cursors: Vec<usize>,
    state: ExecutorState,
}

pub struct Executor {
    resources: Vec<Arc<ResourceCoordinator>>,
    task_database: Arc<TaskDatabase>,
    inner: Mutex<Inner>,
    notify: Notify,
    generation: AtomicU64,
    computer: OnceLock<Weak<Computer>>,
    stopped: AtomicBool,
    executor_idle_reschedule: bool,
    /// Signaled whenever a reconcile pass finds zero active resources while
    /// suspending, so [`Computer::compute_once`] can block on genuine
    /// quiescence instead of polling. Grounded in `CScheduleComputerMain`'s
    /// wait for `executorSuspended()`.
    suspended_cond: (Mutex<bool>, Condvar),
}

impl Executor {
    pub fn new(resources: Vec<Arc<ResourceCoordinator>>, task_database: Arc<TaskDatabase>) -> Arc<Self> {
        Self::new_with_idle_reschedule(resources, task_database, false)
    }

    pub fn new_with_idle_reschedule(
        resources: Vec<Arc<ResourceCoordinator>>,
        task_database: Arc<TaskDatabase>,
        executor_idle_reschedule: bool,
    ) -> Arc<Self> {
        let n = resources.len();
        let executor = Arc::new(Executor {
            resources,
            task_database,
            inner: Mutex::new(Inner {
                schedule: None,
                cursors: vec![0; n],
                state: ExecutorState::Idle,
            }),
            notify: Notify::new(),
            generation: AtomicU64::new(0),
            computer: OnceLock::new(),
            stopped: AtomicBool::new(false),
            executor_idle_reschedule,
            suspended_cond: (Mutex::new(false), Condvar::new()),
        });
        for r in &executor.resources {
            r.bind_executor(Arc::downgrade(&executor));
        }
        executor
    }

    pub fn bind_computer(&self, computer: Weak<Computer>) {
        let _ = self.computer.set(computer);
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Installs a new schedule, resetting every resource's dispatch cursor
    /// to the start. `None` means "no new plan, just resume dispatching the
    /// one already installed" (used after a schedule-wide suspend/resume
    /// cycle rather than a genuinely new computation).
    pub fn update_schedule(&self, schedule: Option<Arc<Schedule>>) {
        let mut inner = self.inner.lock().unwrap();
        match &schedule {
            Some(schedule) => {
                info!(schedule_id = schedule.id, entries = schedule.entries.len(), "new schedule installed");
                event_log::executor_newschedule(schedule.id);
                let n = self.resources.len();
                inner.schedule = Some(schedule.clone());
                inner.cursors = vec![0; n];
                self.generation.fetch_add(1, Ordering::AcqRel);
            }
            None => {
                event_log::executor_resume();
            }
        }
        inner.state = ExecutorState::Dispatching;
        drop(inner);
        self.notify.notify_one();
    }

    /// Suspends every resource currently running a task from the active
    /// schedule, so the computer can compute a fresh one.
    pub fn suspend_schedule(&self) {
        event_log::executor_suspend();
        let mut inner = self.inner.lock().unwrap();
        inner.state = ExecutorState::Suspending;
        drop(inner);
        for r in &self.resources {
            r.suspend();
        }
        self.notify.notify_one();
    }

    /// Blocks the calling thread until every resource has gone idle while
    /// suspending (or isn't suspending at all). Grounded in
    /// `CScheduleComputerMain`'s blocking wait for `executorSuspended()`
    /// before it recomputes.
    pub fn wait_until_suspended(&self) {
        let (lock, condvar) = &self.suspended_cond;
        let mut guard = lock.lock().unwrap();
        loop {
            if self.inner.lock().unwrap().state != ExecutorState::Suspending || self.all_resources_idle() {
                return;
            }
            let (next, _) = condvar
                .wait_timeout(guard, std::time::Duration::from_secs(5))
                .unwrap();
            guard = next;
        }
    }

    fn all_resources_idle(&self) -> bool {
        self.resources.iter().all(|r| r.is_idle())
    }

    /// Called by a [`ResourceCoordinator`] once it falls idle, whatever the
    /// reason (finished, suspended, aborted, or disconnected). Wakes the
    /// dispatch loop to consider the next entry for that resource, and tells
    /// the computer a resource is free to factor into scheduling.
    pub fn operation_done(&self, resource: ResourceId) {
        debug!(resource, "operation done, notifying dispatch loop");
        self.notify.notify_one();
        if self.inner.lock().unwrap().state == ExecutorState::Suspending && self.all_resources_idle() {
            event_log::executor_suspended();
            let (lock, condvar) = &self.suspended_cond;
            let _g = lock.lock().unwrap();
            condvar.notify_all();
            if let Some(computer) = self.computer.get().and_then(Weak::upgrade) {
                computer.executor_suspended();
            }
        }
        if let Some(computer) = self.computer.get().and_then(Weak::upgrade) {
            computer.resource_freed(resource);
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_one();
        let (lock, condvar) = &self.suspended_cond;
        let _g = lock.lock().unwrap();
        condvar.notify_all();
    }

    /// The dispatch loop: while a schedule is installed and not suspending,
    /// assign each idle resource its next matching entry.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            self.reconcile_and_maybe_reschedule();
            self.notify.notified().await;
        }
    }

    /// One dispatch pass without waiting on [`Executor::run`]'s notify loop —
    /// used by the simulation driver, which advances time and reconciliation
    /// explicitly rather than through real async wakeups.
    pub fn step_dispatch(&self) {
        self.reconcile_and_maybe_reschedule();
    }

    /// One entry per resource (by index): the task copy currently occupying
    /// it, or `None` if idle. Fed to [`crate::algorithm::Algorithm::compute`].
    pub fn running_tasks(&self) -> Vec<Option<crate::task::TaskCopy>> {
        self.resources
            .iter()
            .map(|r| {
                r.status()
                    .active_task
                    .and_then(|id| self.task_database.task_copy(id))
            })
            .collect()
    }

    /// The entry a resource's dispatch cursor is sitting on right now,
    /// resolved to `(task_id, name, size, estimated_duration_ns)` — used by
    /// [`crate::resource::ResourceCoordinator`] to describe the upcoming
    /// task to an [`crate::resource::EndHook`] when it goes idle. Grounded
    /// in `CSchedule::getNextTaskEntry`.
    pub fn peek_next_for(&self, resource_id: ResourceId) -> Option<(TaskId, String, u64, Option<u64>)> {
        let inner = self.inner.lock().unwrap();
        let schedule = inner.schedule.as_ref()?;
        let cursor = *inner.cursors.get(resource_id)?;
        let (_, entry) = schedule.next_entry_for(resource_id, cursor)?;
        let copy = self.task_database.task_copy(entry.task_id)?;
        Some((entry.task_id, copy.name, copy.size, entry.estimated_duration_ns))
    }

    /// Reconciles every resource against the installed schedule. Grounded in
    /// `CScheduleExecutorMain::manageResources`'s per-resource decision
    /// table. Returns the number of resources that are busy, waiting on
    /// unmet dependencies, or just dispatched — i.e. not genuinely idle with
    /// nothing left to do.
    fn dispatch_ready_entries(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ExecutorState::Dispatching {
            return 0;
        }
        let Some(schedule) = inner.schedule.clone() else {
            return 0;
        };

        let mut active = 0usize;
        for (resource_id, resource) in self.resources.iter().enumerate() {
            if !resource.is_idle() {
                // Busy: check whether the schedule still agrees with what's
                // running, and nudge it if not.
                active += 1;
                let cursor = inner.cursors[resource_id];
                if let Some((_, head)) = schedule.next_entry_for(resource_id, cursor) {
                    if let Some(running) = resource.current_entry() {
                        if running.task_id == head.task_id {
                            if running.target_progress != head.target_progress {
                                resource.update(head);
                            }
                            // else: already matches, nothing to do.
                        } else {
                            // The schedule wants a different task here now;
                            // suspend so the next pass can dispatch it.
                            resource.suspend();
                        }
                    }
                }
                continue;
            }

            // Idle: walk forward from the cursor past anything stale
            // (terminal tasks left over from a previous schedule) until we
            // find a dispatchable entry, a not-yet-ready one, or run out.
            let mut cursor = inner.cursors[resource_id];
            loop {
                let Some((index, entry)) = schedule.next_entry_for(resource_id, cursor) else {
                    break;
                };
                let Some(task) = self.task_database.task(entry.task_id) else {
                    cursor = index + 1;
                    continue;
                };
                let (state, progress) = {
                    let t = task.lock().unwrap();
                    (t.state, t.progress)
                };
                if state.is_terminal() {
                    cursor = index + 1;
                    continue;
                }
                if !matches!(state, crate::task::TaskState::Pre | crate::task::TaskState::Suspended) {
                    warn!(resource = resource_id, task = entry.task_id, ?state, "entry task in unexpected state, skipping");
                    cursor = index + 1;
                    continue;
                }
                let deps_ready = self.task_database.dependencies_ready(entry.task_id) == 1;
                if !deps_ready || progress < entry.start_checkpoint {
                    inner.cursors[resource_id] = cursor;
                    active += 1;
                    break;
                }
                inner.cursors[resource_id] = index;
                resource.start(task, entry);
                active += 1;
                break;
            }
            if inner.cursors[resource_id] < cursor {
                inner.cursors[resource_id] = cursor;
            }
        }
        active
    }

    /// Resources that are busy or waiting on dependencies count as active;
    /// when none do and unfinished tasks remain, optionally trigger a fresh
    /// computation rather than wait for the next external event. Grounded in
    /// `CScheduleExecutorMain::execute`'s post-`manageResources` check.
    pub fn reconcile_and_maybe_reschedule(&self) {
        let dispatching = self.inner.lock().unwrap().state == ExecutorState::Dispatching;
        let active = self.dispatch_ready_entries();
        if dispatching && active == 0 && self.executor_idle_reschedule && !self.task_database.all_terminal() {
            event_log::executor_idle_reschedule();
            if let Some(computer) = self.computer.get().and_then(Weak::upgrade) {
                computer.compute_schedule();
            }
        }
    }
}
