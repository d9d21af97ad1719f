use std::sync::Arc;

use super::{ack_finished, ack_started, config, register, spec};
use crate::algorithm::LinearAlgorithm;
use crate::core::SchedulerCore;
use crate::schedule::{Schedule, ScheduleEntry};
use crate::task::{OnEnd, TaskState};

fn build(resource_count: usize, executor_idle_reschedule: bool) -> Arc<SchedulerCore> {
    SchedulerCore::build(&config(resource_count, executor_idle_reschedule), Arc::new(LinearAlgorithm))
}

fn state_of(core: &SchedulerCore, id: u32) -> TaskState {
    core.task_database.task(id).unwrap().lock().unwrap().state
}

/// S1: one task, one resource, no dependencies — dispatched, acked started,
/// acked finished, resource goes back to idle.
#[test]
fn single_task_runs_to_completion() {
    let core = build(1, false);
    let ids = register(&core, vec![spec("a", vec![0], vec![])]);
    let a = ids[0];

    assert!(core.computer.compute_once());
    core.executor.step_dispatch();
    assert_eq!(state_of(&core, a), TaskState::Starting);
    assert!(!core.resources[0].is_idle());

    ack_started(&core, a);
    assert_eq!(state_of(&core, a), TaskState::Running);

    ack_finished(&core, a);
    assert_eq!(state_of(&core, a), TaskState::Post);
    assert!(core.resources[0].is_idle());
}

/// S2: B depends on A. B must not be dispatched until A reaches Post.
#[test]
fn dependent_task_waits_for_predecessor() {
    let core = build(2, false);
    let ids = register(&core, vec![spec("a", vec![0], vec![]), spec("b", vec![1], vec![0])]);
    let (a, b) = (ids[0], ids[1]);

    assert!(core.computer.compute_once());
    core.executor.step_dispatch();
    assert_eq!(state_of(&core, a), TaskState::Starting);
    assert_eq!(state_of(&core, b), TaskState::Pre);
    assert!(core.resources[1].is_idle(), "b's resource must stay idle until a finishes");

    ack_started(&core, a);
    ack_finished(&core, a);

    core.task_list_changed();
    assert!(core.computer.compute_once());
    core.executor.step_dispatch();
    assert_eq!(state_of(&core, b), TaskState::Starting);
    assert!(!core.resources[1].is_idle());
}

/// S3: a suspend requested while the task is still Starting is deferred
/// until the Starting -> Running ack, then fires.
#[test]
fn suspend_requested_while_starting_is_deferred() {
    let core = build(1, false);
    let ids = register(&core, vec![spec("a", vec![0], vec![])]);
    let a = ids[0];

    assert!(core.computer.compute_once());
    core.executor.step_dispatch();
    assert_eq!(state_of(&core, a), TaskState::Starting);

    core.executor.suspend_schedule();
    // Still Starting: the ack hasn't arrived, so the suspend must not have
    // been sent yet.
    assert_eq!(state_of(&core, a), TaskState::Starting);

    ack_started(&core, a);
    // The deferred suspend fires once the task reaches Running.
    assert_eq!(state_of(&core, a), TaskState::Stopping);
}

/// S4: a second schedule reassigning the same task/resource pair a new
/// checkpoint target reconciles via `update()`, not `suspend()`.
#[test]
fn checkpoint_change_on_same_task_updates_in_place() {
    let core = build(1, false);
    let ids = register(&core, vec![spec("a", vec![0], vec![])]);
    let a = ids[0];

    let first = Schedule::new(
        core.next_schedule_id(),
        vec![ScheduleEntry {
            task_id: a,
            resource: 0,
            target_progress: Some(5),
            on_end: OnEnd::Suspend,
            start_checkpoint: 0,
            estimated_duration_ns: None,
        }],
    );
    core.executor.update_schedule(Some(Arc::new(first)));
    core.executor.step_dispatch();
    ack_started(&core, a);
    assert_eq!(state_of(&core, a), TaskState::Running);

    let second = Schedule::new(
        core.next_schedule_id(),
        vec![ScheduleEntry {
            task_id: a,
            resource: 0,
            target_progress: Some(7),
            on_end: OnEnd::Suspend,
            start_checkpoint: 0,
            estimated_duration_ns: None,
        }],
    );
    core.executor.update_schedule(Some(Arc::new(second)));
    core.executor.step_dispatch();

    assert_eq!(state_of(&core, a), TaskState::Running, "update must not suspend the task");
    assert_eq!(core.resources[0].current_entry().unwrap().target_progress, Some(7));
}

/// S5: with nothing left for the executor to dispatch and unfinished tasks
/// remaining, `executor_idle_reschedule` decides whether a fresh computation
/// is triggered.
#[test]
fn idle_with_unfinished_tasks_reschedules_only_when_enabled() {
    let enabled = build(1, true);
    register(&enabled, vec![spec("a", vec![0], vec![])]);
    enabled.executor.update_schedule(Some(Arc::new(Schedule::new(0, vec![]))));
    assert!(!enabled.computer.interrupt_flag());
    enabled.executor.reconcile_and_maybe_reschedule();
    assert!(enabled.computer.interrupt_flag(), "idle reschedule must interrupt the computer");

    let disabled = build(1, false);
    register(&disabled, vec![spec("a", vec![0], vec![])]);
    disabled.executor.update_schedule(Some(Arc::new(Schedule::new(0, vec![]))));
    assert!(!disabled.computer.interrupt_flag());
    disabled.executor.reconcile_and_maybe_reschedule();
    assert!(!disabled.computer.interrupt_flag(), "disabled reschedule must leave the computer alone");
}

/// S6: a new schedule wanting a different task on a busy resource suspends
/// the one currently running there rather than updating it in place.
#[test]
fn schedule_swap_to_a_different_task_suspends_the_current_one() {
    let core = build(1, false);
    let ids = register(&core, vec![spec("a", vec![0], vec![]), spec("b", vec![0], vec![])]);
    let (a, b) = (ids[0], ids[1]);

    let first = Schedule::new(
        core.next_schedule_id(),
        vec![ScheduleEntry {
            task_id: a,
            resource: 0,
            target_progress: None,
            on_end: OnEnd::Continue,
            start_checkpoint: 0,
            estimated_duration_ns: None,
        }],
    );
    core.executor.update_schedule(Some(Arc::new(first)));
    core.executor.step_dispatch();
    ack_started(&core, a);
    assert_eq!(state_of(&core, a), TaskState::Running);

    let second = Schedule::new(
        core.next_schedule_id(),
        vec![ScheduleEntry {
            task_id: b,
            resource: 0,
            target_progress: None,
            on_end: OnEnd::Continue,
            start_checkpoint: 0,
            estimated_duration_ns: None,
        }],
    );
    core.executor.update_schedule(Some(Arc::new(second)));
    core.executor.step_dispatch();

    assert_eq!(state_of(&core, a), TaskState::Stopping, "a must be suspended, not updated");
    assert_eq!(state_of(&core, b), TaskState::Pre, "b cannot dispatch until a's resource frees up");
}
