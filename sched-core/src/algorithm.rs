//! Algorithm contract (C4) and a reference implementation.
//!
//! `compute` mirrors `IScheduleAlgorithm::compute`: given the unfinished
//! tasks and what is currently running on each resource, produce a new
//! [`Schedule`] or `None` if interrupted mid-computation. Implementations
//! must poll `interrupted` periodically for long searches; the reference
//! implementation here is cheap enough not to need to.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::schedule::{Schedule, ScheduleEntry};
use crate::task::{OnEnd, TaskCopy, TaskState};

pub trait Algorithm: Send + Sync {
    /// `running` has one entry per resource (by index), `None` where a
    /// resource is currently idle.
    fn compute(
        &self,
        unfinished: &[TaskCopy],
        running: &[Option<TaskCopy>],
        interrupted: &AtomicBool,
        schedule_id: u64,
    ) -> Option<Schedule>;

    fn name(&self) -> &str;
}

/// Greedy first-fit: walks tasks in id order, assigns each ready task
/// (dependencies satisfied, not already assigned) to the first resource in
/// its `valid_resources` list that isn't already claimed by this pass or
/// busy running something else. One entry per assignment, run to
/// completion (`on_end: Continue`, no target progress cap).
pub struct LinearAlgorithm;

impl Algorithm for LinearAlgorithm {
    fn compute(
        &self,
        unfinished: &[TaskCopy],
        running: &[Option<TaskCopy>],
        interrupted: &AtomicBool,
        schedule_id: u64,
    ) -> Option<Schedule> {
        let mut claimed: Vec<bool> = running.iter().map(Option::is_some).collect();
        let mut entries = Vec::new();

        let mut ready: Vec<&TaskCopy> = unfinished
            .iter()
            .filter(|t| matches!(t.state, TaskState::Pre | TaskState::Suspended))
            .collect();
        ready.sort_by_key(|t| t.id);

        for task in ready {
            if interrupted.load(Ordering::Relaxed) {
                return None;
            }
            let already_running = running
                .iter()
                .flatten()
                .any(|r| r.id == task.id && r.state == TaskState::Running);
            if already_running {
                continue;
            }
            for &resource in &task.valid_resources {
                if resource < claimed.len() && !claimed[resource] {
                    claimed[resource] = true;
                    entries.push(ScheduleEntry {
                        task_id: task.id,
                        resource,
                        target_progress: None,
                        on_end: OnEnd::Continue,
                        start_checkpoint: 0,
                        estimated_duration_ns: None,
                    });
                    break;
                }
            }
        }

        Some(Schedule::new(schedule_id, entries))
    }

    fn name(&self) -> &str {
        "linear"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u32, state: TaskState, valid_resources: Vec<usize>) -> TaskCopy {
        TaskCopy {
            id,
            name: format!("t{id}"),
            size: 1,
            checkpoints: 1,
            valid_resources,
            predecessors: vec![],
            successors: vec![],
            state,
            progress: 0,
            assigned_resource: None,
        }
    }

    #[test]
    fn assigns_ready_tasks_to_first_free_resource() {
        let alg = LinearAlgorithm;
        let unfinished = vec![
            task(1, TaskState::Pre, vec![0, 1]),
            task(2, TaskState::Pre, vec![0]),
        ];
        let running = vec![None, None];
        let interrupted = AtomicBool::new(false);
        let sched = alg.compute(&unfinished, &running, &interrupted, 1).unwrap();
        assert_eq!(sched.entries.len(), 2);
        assert_eq!(sched.entries[0].resource, 0);
        assert_eq!(sched.entries[1].resource, 1);
    }

    #[test]
    fn skips_resources_already_running_something() {
        let alg = LinearAlgorithm;
        let unfinished = vec![task(2, TaskState::Pre, vec![0])];
        let running = vec![Some(task(9, TaskState::Running, vec![]))];
        let interrupted = AtomicBool::new(false);
        let sched = alg.compute(&unfinished, &running, &interrupted, 1).unwrap();
        assert!(sched.entries.is_empty());
    }
}
