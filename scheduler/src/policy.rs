//! `Main` adapter/policy pair: one per client connection. Grounded in
//! `CComUnixSchedClientMain`, the concrete subclass application clients talk
//! to (as opposed to `Wrap`, used when this scheduler is itself a client of
//! an upstream one).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use sched_core::adapter::{Adapter, AdapterHandle, OutgoingCommand, SchedPolicy};
use sched_core::task::TaskId;
use sched_core::task_database::NewTaskSpec;
use sched_core::{event_log, SchedulerCore};
use sched_core::protocol::{OnEndWire, ServerMessage};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

pub struct ConnectionAdapter {
    tx: UnboundedSender<ServerMessage>,
    closed: AtomicBool,
    owned_tasks: Mutex<Vec<TaskId>>,
}

impl ConnectionAdapter {
    pub fn new(tx: UnboundedSender<ServerMessage>) -> Arc<Self> {
        Arc::new(ConnectionAdapter {
            tx,
            closed: AtomicBool::new(false),
            owned_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn register_owned(&self, ids: &[TaskId]) {
        self.owned_tasks.lock().unwrap().extend_from_slice(ids);
    }

    pub fn owned_tasks(&self) -> Vec<TaskId> {
        self.owned_tasks.lock().unwrap().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Adapter for ConnectionAdapter {
    fn enqueue(&self, cmd: OutgoingCommand) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let msg = match cmd {
            OutgoingCommand::Start {
                task_id,
                resource,
                target_progress,
                on_end,
            } => ServerMessage::TaskStart {
                id: task_id,
                resource,
                target_progress,
                on_end: OnEndWire::from(on_end),
            },
            OutgoingCommand::Suspend { task_id } => ServerMessage::TaskSuspend { id: task_id },
            OutgoingCommand::Abort { task_id } => ServerMessage::TaskAbort { id: task_id },
            OutgoingCommand::Progress { task_id } => ServerMessage::TaskProgress { id: task_id },
            OutgoingCommand::TaskIds { ids } => ServerMessage::TaskIds { ids },
            OutgoingCommand::Quit => ServerMessage::Quit {},
        };
        if self.tx.send(msg).is_err() {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct MainPolicy {
    core: Arc<SchedulerCore>,
    adapter: Arc<ConnectionAdapter>,
}

impl MainPolicy {
    pub fn new(core: Arc<SchedulerCore>, adapter: Arc<ConnectionAdapter>) -> Self {
        MainPolicy { core, adapter }
    }
}

impl SchedPolicy for MainPolicy {
    fn on_tasklist(&self, specs: Vec<NewTaskSpec>) {
        let adapter_handle: AdapterHandle = self.adapter.clone();
        match self
            .core
            .task_database
            .register_task_list(specs, Some(adapter_handle))
        {
            Ok(ids) => {
                self.adapter.register_owned(&ids);
                for id in &ids {
                    if let Some(name) = self.core.task_database.task(*id).map(|t| t.lock().unwrap().name.clone()) {
                        event_log::task_registered(*id, &name);
                    }
                }
                self.adapter.enqueue(OutgoingCommand::TaskIds { ids });
                self.core.task_list_changed();
            }
            Err(e) => warn!(error = %e, "rejected tasklist"),
        }
    }

    fn on_started(&self, id: TaskId) {
        if let Some(task) = self.core.task_database.task(id) {
            let resource = {
                let mut t = task.lock().unwrap();
                t.started();
                t.assigned_resource
            };
            if let Some(resource_id) = resource {
                event_log::task_started(id, resource_id);
                if let Some(resource) = self.core.resources.get(resource_id) {
                    resource.on_task_started(id);
                }
            }
        }
    }

    fn on_suspended(&self, id: TaskId, progress: u32) {
        let Some(task) = self.core.task_database.task(id) else { return };
        let resource_id = {
            let mut t = task.lock().unwrap();
            t.suspended(progress);
            t.assigned_resource
        };
        if let Some(resource_id) = resource_id {
            if let Some(resource) = self.core.resources.get(resource_id) {
                resource.on_task_suspended(id, progress);
            }
        }
        event_log::task_suspended(id, progress);
    }

    fn on_finished(&self, id: TaskId) {
        let Some(task) = self.core.task_database.task(id) else { return };
        let resource_id = {
            let mut t = task.lock().unwrap();
            t.finished();
            t.assigned_resource
        };
        if let Some(resource_id) = resource_id {
            if let Some(resource) = self.core.resources.get(resource_id) {
                resource.on_task_finished(id);
            }
        }
        event_log::task_finished(id);
    }

    fn on_progress(&self, id: TaskId, progress: u32) {
        let Some(task) = self.core.task_database.task(id) else { return };
        let resource_id = {
            let mut t = task.lock().unwrap();
            t.got_progress(progress);
            t.assigned_resource
        };
        if let Some(resource_id) = resource_id {
            if let Some(resource) = self.core.resources.get(resource_id) {
                resource.on_progress_reply(id, progress);
            }
        }
    }

    fn on_quit(&self) {
        self.adapter.close();
    }

    fn on_fail(&self, reason: &str) {
        warn!(reason, "connection failed");
    }

    fn on_disconnect(&self) {
        self.adapter.close();
        for id in self.adapter.owned_tasks() {
            let Some(task) = self.core.task_database.task(id) else { continue };
            let (was_terminal, resource_id) = {
                let mut t = task.lock().unwrap();
                let was_terminal = t.state.is_terminal();
                if !was_terminal {
                    t.client_disconnected();
                }
                (was_terminal, t.assigned_resource)
            };
            if was_terminal {
                continue;
            }
            event_log::task_aborted(id, None);
            if let Some(resource_id) = resource_id {
                if let Some(resource) = self.core.resources.get(resource_id) {
                    resource.on_client_disconnected();
                }
            }
        }
        self.core.task_list_changed();
    }
}
