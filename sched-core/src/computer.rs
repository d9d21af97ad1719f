//! Schedule Computer (C6): the async loop that re-invokes the placement
//! [`crate::algorithm::Algorithm`] whenever the task graph or resource
//! occupancy changes, and installs the result on the [`crate::executor::Executor`].
//!
//! Grounded in `CScheduleComputerMain::computeAlgorithm` and its surrounding
//! trigger loop. `mAlgorithmInterrupt` becomes an `AtomicBool` shared with the
//! algorithm call; the original's interrupt policy choices (recompute
//! immediately vs. wait for an in-flight progress query vs. suspend the
//! executor first) are preserved as [`ComputerInterruptMode`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::info;

use crate::algorithm::Algorithm;
use crate::event_log;
use crate::executor::Executor;
use crate::measurement::{MeasurementCollector, NullMeasurementCollector};
use crate::resource::ResourceCoordinator;
use crate::task::ResourceId;
use crate::task_database::TaskDatabase;

/// How the computer reacts when a trigger (new tasklist, resource freed)
/// arrives while a computation is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputerInterruptMode {
    /// Let the in-flight computation finish, then recompute.
    NoInterrupt,
    /// Block on a full progress round from every resource before
    /// recomputing, so the algorithm sees fresh progress numbers.
    GetProgress,
    /// Suspend the executor (so resources quiesce) before recomputing.
    SuspendExecutor,
}

struct Stats {
    compute_start: Option<Instant>,
    compute_duration: Option<std::time::Duration>,
}

pub struct Computer {
    algorithm: Arc<dyn Algorithm>,
    task_database: Arc<TaskDatabase>,
    resources: Vec<Arc<ResourceCoordinator>>,
    mode: ComputerInterruptMode,
    /// Gate mirroring `mRequiredApplicationCount`/`mRegisteredApplications`:
    /// a compute pass is skipped until at least this many applications have
    /// registered. `0` disables the gate.
    required_applications: usize,
    executor: OnceLock<Weak<Executor>>,
    interrupt: AtomicBool,
    schedule_counter: AtomicU64,
    notify: Notify,
    stopped: AtomicBool,
    stats: std::sync::Mutex<Stats>,
    measurement: Arc<dyn MeasurementCollector>,
}

impl Computer {
    pub fn new(algorithm: Arc<dyn Algorithm>, task_database: Arc<TaskDatabase>, mode: ComputerInterruptMode) -> Arc<Self> {
        Self::new_full(algorithm, task_database, vec![], mode, 0, Arc::new(NullMeasurementCollector))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_full(
        algorithm: Arc<dyn Algorithm>,
        task_database: Arc<TaskDatabase>,
        resources: Vec<Arc<ResourceCoordinator>>,
        mode: ComputerInterruptMode,
        required_applications: usize,
        measurement: Arc<dyn MeasurementCollector>,
    ) -> Arc<Self> {
        Arc::new(Computer {
            algorithm,
            task_database,
            resources,
            mode,
            required_applications,
            executor: OnceLock::new(),
            interrupt: AtomicBool::new(false),
            schedule_counter: AtomicU64::new(0),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
            stats: std::sync::Mutex::new(Stats {
                compute_start: None,
                compute_duration: None,
            }),
            measurement,
        })
    }

    pub fn bind_executor(&self, executor: Weak<Executor>) {
        let _ = self.executor.set(executor);
    }

    /// A resource has just gone idle. Depending on [`ComputerInterruptMode`]
    /// this may interrupt an in-flight computation.
    pub fn resource_freed(&self, _resource: ResourceId) {
        match self.mode {
            ComputerInterruptMode::GetProgress | ComputerInterruptMode::SuspendExecutor => {
                self.interrupt.store(true, Ordering::Release);
            }
            ComputerInterruptMode::NoInterrupt => {}
        }
        self.notify.notify_one();
    }

    /// New tasks were registered; always worth a recompute.
    pub fn task_list_changed(&self) {
        self.notify.notify_one();
    }

    /// The executor finished quiescing after a suspend — wakes anything
    /// waiting past [`crate::executor::Executor::wait_until_suspended`].
    /// Exists as a symmetric counterpart to `resource_freed`; the actual
    /// blocking happens inside the executor's own condvar.
    pub fn executor_suspended(&self) {
        self.notify.notify_one();
    }

    /// External trigger equivalent to `CScheduleComputerMain::computeSchedule`:
    /// marks an update pending and interrupts any in-flight computation.
    /// Gated by `required_applications` the same way ordinary triggers are,
    /// evaluated live against [`TaskDatabase::application_count`] rather than
    /// snapshotted at trigger time.
    pub fn compute_schedule(&self) {
        event_log::computer_update();
        self.interrupt.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            self.compute_once();
            self.notify.notified().await;
        }
    }

    /// Two-phase progress fan-out, grounded in `CFeedbackMain::getProgress`:
    /// fire a progress request at every resource with something to report,
    /// then block (one resource at a time, but all requests are already in
    /// flight over the wire) until each answers or times out.
    fn get_progress_round(&self) {
        event_log::feedback_getprogress();
        let waits: Vec<_> = self
            .resources
            .iter()
            .filter_map(|r| r.begin_progress_request().map(|fb| (r.clone(), fb)))
            .collect();
        for (resource, feedback) in waits {
            feedback.get_progress_timeout(resource.progress_timeout);
        }
        event_log::feedback_gotprogress();
    }

    /// One pass: snapshot the task graph and running tasks, invoke the
    /// algorithm, and install the result. Returns `false` if the algorithm
    /// was interrupted, the application gate isn't satisfied yet, or there
    /// is no executor bound (no schedule produced this pass — the caller
    /// retries on the next trigger).
    pub fn compute_once(&self) -> bool {
        match self.mode {
            ComputerInterruptMode::SuspendExecutor => {
                if let Some(executor) = self.executor.get().and_then(Weak::upgrade) {
                    executor.suspend_schedule();
                    executor.wait_until_suspended();
                }
            }
            ComputerInterruptMode::GetProgress => {
                self.get_progress_round();
            }
            ComputerInterruptMode::NoInterrupt => {}
        }
        self.interrupt.store(false, Ordering::Release);

        if self.required_applications > 0 && self.task_database.application_count() < self.required_applications {
            return false;
        }

        let unfinished = self.task_database.unfinished();
        let Some(executor) = self.executor.get().and_then(Weak::upgrade) else {
            return false;
        };
        let running = executor.running_tasks();

        let start = Instant::now();
        self.stats.lock().unwrap().compute_start = Some(start);
        let schedule_id = self.schedule_counter.fetch_add(1, Ordering::AcqRel);
        event_log::computer_algostart(schedule_id);
        let result = self
            .algorithm
            .compute(&unfinished, &running, &self.interrupt, schedule_id);
        let duration = start.elapsed();
        self.stats.lock().unwrap().compute_duration = Some(duration);
        event_log::computer_algostop(schedule_id);

        match result {
            Some(schedule) => {
                let duration_ms = duration.as_millis() as u64;
                info!(
                    schedule_id = schedule.id,
                    entries = schedule.entries.len(),
                    duration_ms,
                    algorithm = self.algorithm.name(),
                    "computed schedule"
                );
                event_log::schedule_computed(schedule.id, schedule.entries.len(), duration_ms);
                self.measurement.record_schedule_computed(schedule.id, duration_ms);
                executor.update_schedule(Some(Arc::new(schedule)));
                true
            }
            None => {
                info!("algorithm computation interrupted");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn interrupt_flag(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::LinearAlgorithm;

    #[test]
    fn compute_once_without_executor_bound_is_noop() {
        let computer = Computer::new(
            Arc::new(LinearAlgorithm),
            Arc::new(TaskDatabase::new()),
            ComputerInterruptMode::NoInterrupt,
        );
        assert!(!computer.compute_once());
    }

    #[test]
    fn compute_once_respects_required_applications_gate() {
        let computer = Computer::new_full(
            Arc::new(LinearAlgorithm),
            Arc::new(TaskDatabase::new()),
            vec![],
            ComputerInterruptMode::NoInterrupt,
            1,
            Arc::new(NullMeasurementCollector),
        );
        assert!(!computer.compute_once());
    }
}
