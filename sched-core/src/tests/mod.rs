//! End-to-end scenario tests driving a full [`crate::core::SchedulerCore`]
//! the way the scheduler binary's transport and policy layers would, minus
//! the socket: a [`NullAdapter`] stands in for a live client connection, and
//! the `ack_*` helpers below play the client's half of the protocol by hand
//! (what `MainPolicy` in the `scheduler` binary does on each incoming
//! message, reproduced here since that crate can't be pulled into this
//! one's test target).

mod scenario_tests;

use std::sync::Arc;

use crate::adapter::{Adapter, OutgoingCommand};
use crate::config::{ResourceConfig, SchedulerConfig, TaskRunUntilMode};
use crate::computer::ComputerInterruptMode;
use crate::core::SchedulerCore;
use crate::task::TaskId;
use crate::task_database::NewTaskSpec;

/// Always-open, no-op adapter. `send_start`/`send_suspend`/`send_get_progress`
/// all see a live, non-closed adapter and report success, same as a real
/// connected client that simply hasn't acked yet.
pub(super) struct NullAdapter;

impl Adapter for NullAdapter {
    fn enqueue(&self, _cmd: OutgoingCommand) {}
    fn is_closed(&self) -> bool {
        false
    }
}

pub(super) fn config(resource_count: usize, executor_idle_reschedule: bool) -> SchedulerConfig {
    SchedulerConfig {
        socket_path: "/tmp/sched-core-scenario-test.sock".to_string(),
        resources: (0..resource_count)
            .map(|i| ResourceConfig {
                name: format!("r{i}"),
                retry_end_hook_on_idle: false,
            })
            .collect(),
        algorithm: "linear".to_string(),
        computer_interrupt_mode: ComputerInterruptMode::NoInterrupt,
        task_run_until: TaskRunUntilMode::ProgressSuspend,
        progress_timeout_secs: 5,
        log_dir: "logs".to_string(),
        log_level: "info".to_string(),
        graceful_shutdown_timeout_secs: 10,
        channel_buffer_size: 64,
        computer_required_applications: 0,
        executor_idle_reschedule,
        upstream_socket: None,
    }
}

pub(super) fn spec(name: &str, resources: Vec<usize>, deps: Vec<usize>) -> NewTaskSpec {
    NewTaskSpec {
        name: name.to_string(),
        size: 10,
        checkpoints: 4,
        valid_resources: resources,
        dependencies: deps,
    }
}

/// Registers `specs` as one TASKLIST batch behind a [`NullAdapter`], the way
/// `MainPolicy::on_tasklist` would after `protocol::validate_tasklist`.
pub(super) fn register(core: &SchedulerCore, specs: Vec<NewTaskSpec>) -> Vec<TaskId> {
    core.task_database
        .register_task_list(specs, Some(Arc::new(NullAdapter)))
        .unwrap()
}

/// Plays the client's TASK_STARTED ack: advances the task to Running and
/// lets its resource fire any suspend deferred while it was Starting.
pub(super) fn ack_started(core: &SchedulerCore, id: TaskId) {
    let Some(task) = core.task_database.task(id) else { return };
    let resource = {
        let mut t = task.lock().unwrap();
        t.started();
        t.assigned_resource
    };
    if let Some(resource_id) = resource {
        if let Some(resource) = core.resources.get(resource_id) {
            resource.on_task_started(id);
        }
    }
}

/// Plays the client's TASK_FINISHED ack.
pub(super) fn ack_finished(core: &SchedulerCore, id: TaskId) {
    let Some(task) = core.task_database.task(id) else { return };
    let resource = {
        let mut t = task.lock().unwrap();
        t.finished();
        t.assigned_resource
    };
    if let Some(resource_id) = resource {
        if let Some(resource) = core.resources.get(resource_id) {
            resource.on_task_finished(id);
        }
    }
}
