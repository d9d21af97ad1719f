//! Client/scheduler protocol adapters (C8).
//!
//! The reference implementation mixes transport, protocol parsing and policy
//! through a deep virtual hierarchy (`CComClient` -> `CComUnixClient` ->
//! `CComUnixSchedClient` -> `CComUnixSchedClientMain`/`Wrap`). We collapse
//! that into composition: a transport-agnostic [`Adapter`] handle that owns a
//! writer queue, plus a [`SchedPolicy`] trait with two implementations
//! (`Main` in the `scheduler` binary, `Wrap` for scheduler-as-client-of-
//! another-scheduler) that decide what incoming messages mean.

use std::sync::Arc;

use crate::task::{OnEnd, TaskId};

/// One outgoing command, independent of wire encoding. Adapters translate
/// these into protocol messages; transports translate protocol messages into
/// bytes.
#[derive(Debug, Clone)]
pub enum OutgoingCommand {
    Start {
        task_id: TaskId,
        resource: String,
        target_progress: Option<u32>,
        on_end: OnEnd,
    },
    Suspend {
        task_id: TaskId,
    },
    Abort {
        task_id: TaskId,
    },
    Progress {
        task_id: TaskId,
    },
    TaskIds {
        ids: Vec<TaskId>,
    },
    Quit,
}

/// A connection's outgoing side: enqueues a command on its writer queue.
///
/// Enqueuing never blocks and never fails silently into a deadlock: a closed
/// adapter simply drops the command, exactly as a disconnected client would
/// never have received it anyway.
pub trait Adapter: Send + Sync {
    fn enqueue(&self, cmd: OutgoingCommand);

    /// True once the adapter has observed a transport error, a QUIT, or has
    /// been told to close. Tasks still owned by a closed adapter are
    /// expected to be cascaded to `client_disconnected` by the caller.
    fn is_closed(&self) -> bool;
}

pub type AdapterHandle = Arc<dyn Adapter>;

/// Translates incoming protocol messages into operations on the task
/// database and on individual tasks. Two concrete implementations satisfy
/// this trait: a `Main` policy (application clients) and a `Wrap` policy
/// (this scheduler acting as a client of an upstream scheduler).
pub trait SchedPolicy: Send + Sync {
    /// A TASKLIST record parsed off the wire. `specs` preserves list order;
    /// the adapter is responsible for registering them with the task
    /// database and replying with TASKIDS.
    fn on_tasklist(&self, specs: Vec<crate::task_database::NewTaskSpec>);
    fn on_started(&self, id: TaskId);
    fn on_suspended(&self, id: TaskId, progress: u32);
    fn on_finished(&self, id: TaskId);
    fn on_progress(&self, id: TaskId, progress: u32);
    fn on_quit(&self);
    /// A protocol or transport error occurred; `reason` is for the
    /// diagnostic log only, never sent back to the peer.
    fn on_fail(&self, reason: &str);
    /// The connection closed (EOF, error, or QUIT). Every task this adapter
    /// ever registered must be reacted to as a client disconnect.
    fn on_disconnect(&self);
}
