//! Task data model and state machine.
//!
//! A [`Task`] is never destroyed once registered (the Task Database owns it
//! for the process lifetime); everyone else — resource coordinators,
//! schedules, algorithms — refers to it by [`TaskId`] or holds a
//! [`TaskHandle`] (a cloneable `Arc` to the shared, mutex-protected state).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterHandle, OutgoingCommand};

pub type TaskId = u32;
pub type ResourceId = usize;

/// Task lifecycle state. See the state machine invariants: at most one
/// resource holds a task in STARTING/RUNNING/STOPPING; POST and ABORTED are
/// terminal; only POST satisfies a successor's dependency predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pre,
    Starting,
    Running,
    Stopping,
    Suspended,
    Post,
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Post | TaskState::Aborted)
    }
}

/// What the client should do once it reaches the target checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnEnd {
    Suspend,
    Continue,
}

#[derive(Debug, Clone, Default)]
pub struct TaskTimes {
    pub added: Option<Instant>,
    pub started: Option<Instant>,
    pub finished: Option<Instant>,
    pub aborted: Option<Instant>,
}

/// The mutable half of a task, guarded by a single mutex. Held behind an
/// `Arc` so the task database, resource coordinators and adapters can all
/// reference the same task without the database ever giving up ownership.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub checkpoints: u32,
    pub valid_resources: Vec<ResourceId>,
    pub predecessors: Vec<TaskId>,
    pub successors: Vec<TaskId>,
    pub state: TaskState,
    pub progress: u32,
    pub assigned_resource: Option<ResourceId>,
    pub times: TaskTimes,
    adapter: Option<AdapterHandle>,
}

pub type TaskHandle = Arc<Mutex<Task>>;

impl Task {
    pub fn new(
        id: TaskId,
        name: String,
        size: u64,
        checkpoints: u32,
        valid_resources: Vec<ResourceId>,
        predecessors: Vec<TaskId>,
        adapter: Option<AdapterHandle>,
    ) -> Self {
        Task {
            id,
            name,
            size,
            checkpoints,
            valid_resources,
            predecessors,
            successors: Vec::new(),
            state: TaskState::Pre,
            progress: 0,
            assigned_resource: None,
            times: TaskTimes {
                added: Some(Instant::now()),
                ..Default::default()
            },
            adapter,
        }
    }

    /// Scheduler-side: send TASK_START to the owning client. Returns `false`
    /// if there is no live adapter, in which case the caller must abort the
    /// task to avoid blocking the schedule.
    pub fn send_start(&mut self, resource: &str, target_progress: Option<u32>, on_end: OnEnd) -> bool {
        if !matches!(
            self.state,
            TaskState::Pre | TaskState::Suspended | TaskState::Running | TaskState::Starting
        ) {
            return false;
        }
        self.assigned_resource_name_hint(resource);
        self.times.started = Some(Instant::now());
        if self.state != TaskState::Running {
            self.state = TaskState::Starting;
        }
        match &self.adapter {
            Some(adapter) if !adapter.is_closed() => {
                adapter.enqueue(OutgoingCommand::Start {
                    task_id: self.id,
                    resource: resource.to_string(),
                    target_progress,
                    on_end,
                });
                true
            }
            _ => false,
        }
    }

    fn assigned_resource_name_hint(&mut self, _resource: &str) {
        // assigned_resource (the id) is set by the caller (ResourceCoordinator),
        // which already knows its own id; this hook exists purely to keep the
        // Task <-> adapter interaction symmetric with suspend/abort below.
    }

    /// Scheduler-side: send TASK_SUSPEND. Only valid while RUNNING.
    pub fn send_suspend(&mut self) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        self.state = TaskState::Stopping;
        match &self.adapter {
            Some(adapter) if !adapter.is_closed() => {
                adapter.enqueue(OutgoingCommand::Suspend { task_id: self.id });
                true
            }
            _ => false,
        }
    }

    /// Scheduler-side: send TASK_PROGRESS. Only valid while RUNNING.
    pub fn send_get_progress(&mut self) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        match &self.adapter {
            Some(adapter) if !adapter.is_closed() => {
                adapter.enqueue(OutgoingCommand::Progress { task_id: self.id });
                true
            }
            _ => false,
        }
    }

    /// Scheduler-side: abort. Idempotent — a POST or already-ABORTED task is
    /// left untouched.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TaskState::Aborted;
        self.times.aborted = Some(Instant::now());
        if let Some(adapter) = self.adapter.take() {
            adapter.enqueue(OutgoingCommand::Abort { task_id: self.id });
        }
    }

    /// Client-side: reacts to a TASK_STARTED ack.
    pub fn started(&mut self) {
        if self.state != TaskState::Starting {
            return;
        }
        self.state = TaskState::Running;
    }

    /// Client-side: reacts to a TASK_SUSPENDED ack.
    pub fn suspended(&mut self, progress: u32) {
        if !matches!(self.state, TaskState::Stopping | TaskState::Running) {
            return;
        }
        self.state = TaskState::Suspended;
        self.progress = progress;
    }

    /// Client-side: reacts to a TASK_FINISHED ack.
    pub fn finished(&mut self) {
        if !matches!(self.state, TaskState::Running | TaskState::Stopping) {
            return;
        }
        self.state = TaskState::Post;
        self.times.finished = Some(Instant::now());
    }

    /// Client-side: reacts to a PROGRESS response.
    pub fn got_progress(&mut self, progress: u32) {
        if self.state != TaskState::Running {
            return;
        }
        self.progress = progress;
    }

    /// Client-side: reacts to the adapter rejecting a write or the peer
    /// explicitly aborting the task. Unlike [`Task::abort`] this never tries
    /// to notify a client (there may be none left).
    pub fn aborted(&mut self) {
        self.adapter = None;
        if !self.state.is_terminal() {
            self.state = TaskState::Aborted;
            self.times.aborted = Some(Instant::now());
        }
    }

    /// Client-side: reacts to the owning adapter disconnecting.
    pub fn client_disconnected(&mut self) {
        self.adapter = None;
        if !self.state.is_terminal() {
            self.state = TaskState::Aborted;
            self.times.aborted = Some(Instant::now());
        }
    }

    /// 1 if ready, 0 if waiting, -1 if a predecessor is aborted (so this task
    /// can never become ready).
    pub fn dependencies_ready(predecessors: &[TaskState]) -> i8 {
        for state in predecessors {
            if *state == TaskState::Aborted {
                return -1;
            }
            if *state != TaskState::Post {
                return 0;
            }
        }
        1
    }

    pub fn to_copy(&self) -> TaskCopy {
        TaskCopy {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
            checkpoints: self.checkpoints,
            valid_resources: self.valid_resources.clone(),
            predecessors: self.predecessors.clone(),
            successors: self.successors.clone(),
            state: self.state,
            progress: self.progress,
            assigned_resource: self.assigned_resource,
        }
    }
}

/// An immutable snapshot of a task's fields, with no live pointers back into
/// the task database — what Algorithm implementations actually see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCopy {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub checkpoints: u32,
    pub valid_resources: Vec<ResourceId>,
    pub predecessors: Vec<TaskId>,
    pub successors: Vec<TaskId>,
    pub state: TaskState,
    pub progress: u32,
    pub assigned_resource: Option<ResourceId>,
}
