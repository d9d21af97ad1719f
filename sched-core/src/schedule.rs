//! Schedule (C5): an ordered, immutable placement plan handed from an
//! [`crate::algorithm::Algorithm`] to the [`crate::executor::Executor`].
//!
//! Grounded in `CSchedule`/`CScheduleEntry`: each entry binds one task to
//! one resource with an explicit run-until mode; the executor walks entries
//! strictly in order, one in flight per resource at a time.

use serde::{Deserialize, Serialize};

use crate::task::{OnEnd, ResourceId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub task_id: TaskId,
    pub resource: ResourceId,
    pub target_progress: Option<u32>,
    pub on_end: OnEnd,
    /// Checkpoint the task must already have reached for this entry to be
    /// dispatchable. `0` for a task that hasn't run yet; nonzero when the
    /// algorithm is resuming a task it previously suspended mid-run.
    #[serde(default)]
    pub start_checkpoint: u32,
    /// Estimated nanoseconds this entry will occupy its resource, used to
    /// arm the `EstimationTimer` suspend deadline and to report the idle
    /// gap before a resource's next entry in [`crate::resource::EndHook`].
    /// `None` when the algorithm didn't estimate a duration.
    #[serde(default)]
    pub estimated_duration_ns: Option<u64>,
}

/// A complete, numbered placement plan. Schedules are never mutated after
/// construction; a new schedule entirely replaces the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: u64,
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(id: u64, entries: Vec<ScheduleEntry>) -> Self {
        Schedule { id, entries }
    }

    /// The next not-yet-dispatched entry for `resource`, starting the scan
    /// at `from_index` (the executor's per-resource cursor).
    pub fn next_entry_for(&self, resource: ResourceId, from_index: usize) -> Option<(usize, &ScheduleEntry)> {
        self.entries[from_index..]
            .iter()
            .enumerate()
            .find(|(_, e)| e.resource == resource)
            .map(|(offset, e)| (from_index + offset, e))
    }

    pub fn print_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_entry_for_skips_other_resources() {
        let sched = Schedule::new(
            1,
            vec![
                ScheduleEntry {
                    task_id: 1,
                    resource: 0,
                    target_progress: None,
                    on_end: OnEnd::Continue,
                    start_checkpoint: 0,
                    estimated_duration_ns: None,
                },
                ScheduleEntry {
                    task_id: 2,
                    resource: 1,
                    target_progress: None,
                    on_end: OnEnd::Continue,
                    start_checkpoint: 0,
                    estimated_duration_ns: None,
                },
                ScheduleEntry {
                    task_id: 3,
                    resource: 0,
                    target_progress: Some(4),
                    on_end: OnEnd::Suspend,
                    start_checkpoint: 0,
                    estimated_duration_ns: None,
                },
            ],
        );
        let (idx, entry) = sched.next_entry_for(0, 0).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(entry.task_id, 1);
        let (idx, entry) = sched.next_entry_for(0, 1).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(entry.task_id, 3);
        assert!(sched.next_entry_for(0, 3).is_none());
    }
}
