//! Task Database (C1): the single authority for task identity, dependency
//! wiring and lifecycle transitions.
//!
//! Grounded in `CTaskDatabase::registerTasklist`/`abortTask`/`copyUnfinishedTasks`.
//! One deliberate deviation from the original: `abort` cascades over
//! *successors* (the forward graph closure the specification calls for),
//! not over `getDependencies()` predecessors as the original code does —
//! see the design notes for why that's treated as a bug in the original
//! rather than a behavior to imitate.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterHandle;
use crate::error::TaskDatabaseError;
use crate::task::{OnEnd, ResourceId, Task, TaskCopy, TaskHandle, TaskId, TaskState};

/// One task as described by a TASKLIST record, before it has been assigned
/// a database-wide id. `dependencies` are indices into the same tasklist
/// batch, each required to be strictly less than the task's own index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaskSpec {
    pub name: String,
    pub size: u64,
    pub checkpoints: u32,
    pub valid_resources: Vec<ResourceId>,
    pub dependencies: Vec<usize>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, TaskHandle>,
    next_id: TaskId,
    /// Count of successful `register_task_list` calls — one per
    /// application, per `CTaskDatabase::getApplicationCount`, not the total
    /// task count.
    application_count: usize,
}

/// Owns every task for the life of the process. Tasks are never removed;
/// terminal tasks (POST/ABORTED) simply stop being returned by
/// `unfinished()`.
pub struct TaskDatabase {
    inner: Mutex<Inner>,
}

impl TaskDatabase {
    pub fn new() -> Self {
        TaskDatabase {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a batch of new tasks from a single TASKLIST record,
    /// wiring predecessor/successor links from intra-batch `dependencies`
    /// indices. Rejects the whole batch — no task is registered — if any
    /// dependency index is not strictly before its referring task, mirroring
    /// the original's all-or-nothing TASKLIST validation.
    ///
    /// Returns the assigned ids in list order.
    pub fn register_task_list(
        &self,
        specs: Vec<NewTaskSpec>,
        adapter: Option<AdapterHandle>,
    ) -> Result<Vec<TaskId>, TaskDatabaseError> {
        for (index, spec) in specs.iter().enumerate() {
            for &dep in &spec.dependencies {
                if dep >= index {
                    return Err(TaskDatabaseError::InvalidDependency {
                        index,
                        dep: dep as i64,
                    });
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        let base_id = inner.next_id;
        let mut ids = Vec::with_capacity(specs.len());

        for (local_index, spec) in specs.iter().enumerate() {
            let id = base_id + local_index as TaskId;
            let predecessors = spec
                .dependencies
                .iter()
                .map(|&dep| base_id + dep as TaskId)
                .collect();
            let task = Task::new(
                id,
                spec.name.clone(),
                spec.size,
                spec.checkpoints,
                spec.valid_resources.clone(),
                predecessors,
                adapter.clone(),
            );
            inner.tasks.insert(id, std::sync::Arc::new(Mutex::new(task)));
            ids.push(id);
        }

        for (local_index, spec) in specs.iter().enumerate() {
            let id = base_id + local_index as TaskId;
            for &dep in &spec.dependencies {
                let pred_id = base_id + dep as TaskId;
                if let Some(pred) = inner.tasks.get(&pred_id) {
                    pred.lock().unwrap().successors.push(id);
                }
            }
        }

        inner.next_id = base_id + specs.len() as TaskId;
        inner.application_count += 1;
        Ok(ids)
    }

    pub fn task(&self, id: TaskId) -> Option<TaskHandle> {
        self.inner.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn task_copy(&self, id: TaskId) -> Option<TaskCopy> {
        self.task(id).map(|t| t.lock().unwrap().to_copy())
    }

    /// Every non-terminal task, as a detached snapshot — what
    /// `computeAlgorithm` feeds to an [`crate::algorithm::Algorithm`].
    pub fn unfinished(&self) -> Vec<TaskCopy> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .values()
            .filter_map(|t| {
                let t = t.lock().unwrap();
                if t.state.is_terminal() {
                    None
                } else {
                    Some(t.to_copy())
                }
            })
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.tasks.values().all(|t| t.lock().unwrap().state.is_terminal())
    }

    /// Number of applications (TASKLIST batches) registered so far, not the
    /// total task count. Feeds the `computer_required_applications` gate.
    pub fn application_count(&self) -> usize {
        self.inner.lock().unwrap().application_count
    }

    /// Aborts `id` and transitively every task reachable through
    /// `successors` (forward graph closure over dependents).
    pub fn abort(&self, id: TaskId) {
        let inner = self.inner.lock().unwrap();
        let mut stack = vec![id];
        let mut visited = std::collections::HashSet::new();
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let Some(handle) = inner.tasks.get(&next) else {
                continue;
            };
            let successors = {
                let mut task = handle.lock().unwrap();
                task.abort();
                task.successors.clone()
            };
            stack.extend(successors);
        }
    }

    /// Aggregates predecessor states for [`Task::dependencies_ready`]
    /// without holding any task's own lock while inspecting others'.
    pub fn dependencies_ready(&self, id: TaskId) -> i8 {
        let inner = self.inner.lock().unwrap();
        let Some(handle) = inner.tasks.get(&id) else {
            return -1;
        };
        let predecessors = handle.lock().unwrap().predecessors.clone();
        let states: Vec<TaskState> = predecessors
            .iter()
            .filter_map(|pid| inner.tasks.get(pid).map(|t| t.lock().unwrap().state))
            .collect();
        Task::dependencies_ready(&states)
    }

    pub fn on_end_default() -> OnEnd {
        OnEnd::Suspend
    }
}

impl Default for TaskDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: Vec<usize>) -> NewTaskSpec {
        NewTaskSpec {
            name: name.to_string(),
            size: 10,
            checkpoints: 4,
            valid_resources: vec![0],
            dependencies: deps,
        }
    }

    #[test]
    fn rejects_forward_dependency() {
        let db = TaskDatabase::new();
        let specs = vec![spec("a", vec![1]), spec("b", vec![])];
        assert!(db.register_task_list(specs, None).is_err());
        assert_eq!(db.application_count(), 0);
    }

    #[test]
    fn wires_predecessors_and_successors() {
        let db = TaskDatabase::new();
        let specs = vec![spec("a", vec![]), spec("b", vec![0])];
        let ids = db.register_task_list(specs, None).unwrap();
        let b = db.task(ids[1]).unwrap();
        assert_eq!(b.lock().unwrap().predecessors, vec![ids[0]]);
        let a = db.task(ids[0]).unwrap();
        assert_eq!(a.lock().unwrap().successors, vec![ids[1]]);
        assert_eq!(db.dependencies_ready(ids[1]), 0);
    }

    #[test]
    fn abort_cascades_to_successors_not_predecessors() {
        let db = TaskDatabase::new();
        let specs = vec![spec("a", vec![]), spec("b", vec![0])];
        let ids = db.register_task_list(specs, None).unwrap();
        db.abort(ids[0]);
        let a = db.task(ids[0]).unwrap();
        let b = db.task(ids[1]).unwrap();
        assert_eq!(a.lock().unwrap().state, TaskState::Aborted);
        assert_eq!(b.lock().unwrap().state, TaskState::Aborted);
    }

    #[test]
    fn application_count_tracks_batches_not_tasks() {
        let db = TaskDatabase::new();
        db.register_task_list(vec![spec("a", vec![]), spec("b", vec![])], None).unwrap();
        assert_eq!(db.application_count(), 1);
        db.register_task_list(vec![spec("c", vec![])], None).unwrap();
        assert_eq!(db.application_count(), 2);
    }

    #[test]
    fn abort_of_successor_does_not_touch_predecessor() {
        let db = TaskDatabase::new();
        let specs = vec![spec("a", vec![]), spec("b", vec![0])];
        let ids = db.register_task_list(specs, None).unwrap();
        db.abort(ids[1]);
        let a = db.task(ids[0]).unwrap();
        assert_eq!(a.lock().unwrap().state, TaskState::Pre);
    }
}
