//! Top-level wiring: owns every long-lived component and ties the
//! Computer/Executor/Resource cycle together after construction, the way
//! the original's `CMain` builds `CScheduleComputerMain`, `CScheduleExecutor`
//! and the `CResource` table before starting the poll loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::computer::Computer;
use crate::config::SchedulerConfig;
use crate::executor::Executor;
use crate::measurement::{MeasurementCollector, NullMeasurementCollector};
use crate::resource::{EndHook, NullEndHook, ResourceCoordinator};
use crate::task_database::TaskDatabase;

pub struct SchedulerCore {
    pub task_database: Arc<TaskDatabase>,
    pub resources: Vec<Arc<ResourceCoordinator>>,
    pub computer: Arc<Computer>,
    pub executor: Arc<Executor>,
    schedule_id: AtomicU64,
}

impl SchedulerCore {
    pub fn build(config: &SchedulerConfig, algorithm: Arc<dyn Algorithm>) -> Arc<Self> {
        Self::build_with_end_hook(config, algorithm, Arc::new(NullEndHook))
    }

    pub fn build_with_end_hook(
        config: &SchedulerConfig,
        algorithm: Arc<dyn Algorithm>,
        end_hook: Arc<dyn EndHook>,
    ) -> Arc<Self> {
        Self::build_full(config, algorithm, end_hook, Arc::new(NullMeasurementCollector))
    }

    pub fn build_full(
        config: &SchedulerConfig,
        algorithm: Arc<dyn Algorithm>,
        end_hook: Arc<dyn EndHook>,
        measurement: Arc<dyn MeasurementCollector>,
    ) -> Arc<Self> {
        let task_database = Arc::new(TaskDatabase::new());
        let progress_timeout = Duration::from_secs(config.progress_timeout_secs);
        let resources: Vec<Arc<ResourceCoordinator>> = config
            .resources
            .iter()
            .enumerate()
            .map(|(id, rc)| {
                Arc::new(ResourceCoordinator::new_with_measurement(
                    id,
                    rc.name.clone(),
                    rc.retry_end_hook_on_idle,
                    progress_timeout,
                    config.task_run_until,
                    end_hook.clone(),
                    measurement.clone(),
                ))
            })
            .collect();

        let executor = Executor::new_with_idle_reschedule(
            resources.clone(),
            task_database.clone(),
            config.executor_idle_reschedule,
        );
        let computer = Computer::new_full(
            algorithm,
            task_database.clone(),
            resources.clone(),
            config.computer_interrupt_mode,
            config.computer_required_applications,
            measurement,
        );
        computer.bind_executor(Arc::downgrade(&executor));
        executor.bind_computer(Arc::downgrade(&computer));

        Arc::new(SchedulerCore {
            task_database,
            resources,
            computer,
            executor,
            schedule_id: AtomicU64::new(0),
        })
    }

    pub fn resource_id_by_name(&self, name: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.name == name)
    }

    pub fn resource_name(&self, id: usize) -> Option<&str> {
        self.resources.get(id).map(|r| r.name.as_str())
    }

    /// Notifies the computer that the task graph changed (e.g. a TASKLIST
    /// was just registered) so it schedules a recompute.
    pub fn task_list_changed(&self) {
        self.computer.task_list_changed();
    }

    pub fn next_schedule_id(&self) -> u64 {
        self.schedule_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Runs the computer and executor loops until [`SchedulerCore::shutdown`]
    /// is called. Returns once both have stopped.
    pub async fn run(self: Arc<Self>) {
        let computer = self.computer.clone();
        let executor = self.executor.clone();
        let computer_task = tokio::spawn(computer.run());
        let executor_task = tokio::spawn(executor.run());
        let _ = tokio::join!(computer_task, executor_task);
    }

    pub fn shutdown(&self) {
        self.computer.stop();
        self.executor.stop();
    }
}
