//! `Wrap` adapter/policy pair: used when this scheduler is itself a client of
//! an upstream scheduler instead of the final authority over its resources.
//! Grounded in `CUnixWrapClient`, which sits between a set of local
//! application clients and one upstream `CComUnixSchedClient` connection,
//! translating task ids between the two id spaces
//! (`taskSchedToGlobal`/`taskGlobalToSched`) and forwarding lifecycle
//! messages in both directions.
//!
//! Unlike [`crate::policy::MainPolicy`], a `Wrap`-mode connection owns no
//! resources and no local task state: every decision (placement, scheduling)
//! is the upstream scheduler's. This instance exists purely to multiplex
//! however many local application clients it has onto the one upstream link,
//! minting its own local ids so each local client still gets a self-
//! consistent TASKIDS reply.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sched_core::adapter::{Adapter, OutgoingCommand, SchedPolicy};
use sched_core::protocol::{self, ClientMessage, ServerMessage, TaskSpecWire};
use sched_core::task::TaskId;
use sched_core::task_database::NewTaskSpec;
use sched_core::SchedulerCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::policy::ConnectionAdapter;

/// One local client's outstanding TASKLIST, waiting on the matching upstream
/// TASKIDS reply. Matched FIFO, mirroring the original's single synchronous
/// link: a `Wrap` instance has exactly one upstream connection, so replies
/// arrive in request order.
struct PendingTasklist {
    adapter: Arc<ConnectionAdapter>,
    count: usize,
}

struct WrapInner {
    local_to_upstream: HashMap<TaskId, TaskId>,
    upstream_to_local: HashMap<TaskId, (TaskId, Arc<ConnectionAdapter>)>,
    pending: VecDeque<PendingTasklist>,
}

/// Shared by every local connection this process serves while it runs in
/// `Wrap` mode, and by the single upstream link task.
pub struct WrapState {
    inner: Mutex<WrapInner>,
    next_local_id: AtomicI64,
    to_upstream: UnboundedSender<ClientMessage>,
}

impl WrapState {
    fn send_upstream(&self, msg: ClientMessage) {
        if self.to_upstream.send(msg).is_err() {
            warn!("upstream link gone, dropping outgoing message");
        }
    }

    fn mint_local_id(&self) -> TaskId {
        self.next_local_id.fetch_add(1, Ordering::AcqRel)
    }
}

/// Connects to `upstream_socket`, speaks the client side of the protocol,
/// and returns the shared state new [`WrapPolicy`]s should be built with.
/// The returned future drives the read loop and must be spawned by the
/// caller; it exits when the upstream connection closes.
pub async fn connect(upstream_socket: &Path) -> Result<(Arc<WrapState>, impl std::future::Future<Output = ()>)> {
    let stream = UnixStream::connect(upstream_socket)
        .await
        .with_context(|| format!("failed to connect to upstream scheduler at {}", upstream_socket.display()))?;
    let (mut reader, mut writer) = stream.into_split();
    writer
        .write_all(&protocol::handshake_bytes(protocol::CURRENT_PROTOCOL_VERSION))
        .await
        .context("failed to send handshake to upstream scheduler")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    let state = Arc::new(WrapState {
        inner: Mutex::new(WrapInner {
            local_to_upstream: HashMap::new(),
            upstream_to_local: HashMap::new(),
            pending: VecDeque::new(),
        }),
        next_local_id: AtomicI64::new(1),
        to_upstream: tx,
    });

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match protocol::encode_client(&msg) {
                Ok(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode message for upstream"),
            }
        }
    });

    let link_state = state.clone();
    let link = async move {
        let mut buf: Vec<u8> = Vec::with_capacity(protocol::INITIAL_BUFFER_SIZE);
        loop {
            match read_record(&mut reader, &mut buf).await {
                Ok(Some(record)) => match protocol::decode_server_message(&record) {
                    Ok(message) => dispatch_from_upstream(&link_state, message),
                    Err(e) => warn!(error = %e, "malformed record from upstream scheduler"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "read error on upstream link, closing");
                    break;
                }
            }
        }
        writer_task.abort();
        debug!("upstream link closed");
    };

    Ok((state, link))
}

async fn read_record(reader: &mut (impl tokio::io::AsyncRead + Unpin), buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == protocol::RECORD_TERMINATOR) {
            let record = buf[..pos].to_vec();
            buf.drain(..=pos);
            return Ok(Some(record));
        }
        if buf.len() >= protocol::MAX_BUFFER_SIZE {
            anyhow::bail!("record from upstream exceeds {} bytes without a terminator", protocol::MAX_BUFFER_SIZE);
        }
        let mut chunk = [0u8; 1024];
        let n = reader.read(&mut chunk).await.context("upstream socket read failed")?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// A message arrived from the upstream scheduler; remap its id back to the
/// local client that owns it and forward the equivalent command down.
fn dispatch_from_upstream(state: &Arc<WrapState>, message: ServerMessage) {
    match message {
        ServerMessage::TaskIds { ids } => {
            let Some(pending) = state.inner.lock().unwrap().pending.pop_front() else {
                warn!("received TASKIDS upstream with no pending tasklist to match it to");
                return;
            };
            if ids.len() != pending.count {
                warn!(expected = pending.count, got = ids.len(), "upstream TASKIDS count mismatch");
            }
            let mut local_ids = Vec::with_capacity(ids.len());
            {
                let mut inner = state.inner.lock().unwrap();
                for upstream_id in ids {
                    let local_id = state.mint_local_id();
                    inner.local_to_upstream.insert(local_id, upstream_id);
                    inner.upstream_to_local.insert(upstream_id, (local_id, pending.adapter.clone()));
                    local_ids.push(local_id);
                }
            }
            pending.adapter.enqueue(OutgoingCommand::TaskIds { ids: local_ids });
        }
        ServerMessage::TaskStart { id, resource, target_progress, on_end } => {
            forward_down(state, id, |local_id, adapter| {
                adapter.enqueue(OutgoingCommand::Start {
                    task_id: local_id,
                    resource,
                    target_progress,
                    on_end: on_end.into(),
                });
            });
        }
        ServerMessage::TaskSuspend { id } => {
            forward_down(state, id, |local_id, adapter| {
                adapter.enqueue(OutgoingCommand::Suspend { task_id: local_id });
            });
        }
        ServerMessage::TaskAbort { id } => {
            forward_down(state, id, |local_id, adapter| {
                adapter.enqueue(OutgoingCommand::Abort { task_id: local_id });
            });
            state.inner.lock().unwrap().upstream_to_local.remove(&id);
        }
        ServerMessage::TaskProgress { id } => {
            forward_down(state, id, |local_id, adapter| {
                adapter.enqueue(OutgoingCommand::Progress { task_id: local_id });
            });
        }
        ServerMessage::Quit {} => {
            debug!("upstream scheduler requested QUIT");
        }
    }
}

fn forward_down(state: &Arc<WrapState>, upstream_id: TaskId, f: impl FnOnce(TaskId, &Arc<ConnectionAdapter>)) {
    let entry = state.inner.lock().unwrap().upstream_to_local.get(&upstream_id).cloned();
    match entry {
        Some((local_id, adapter)) => f(local_id, &adapter),
        None => warn!(upstream_id, "upstream message for unknown or vanished task"),
    }
}

/// Per local-connection policy: translates what a local application client
/// reports into the equivalent upstream-id message, forwarded over the one
/// shared upstream link. Holds no resource table of its own.
pub struct WrapPolicy {
    state: Arc<WrapState>,
    adapter: Arc<ConnectionAdapter>,
    /// Used only to recover resource name strings for an outgoing TASKLIST
    /// (`valid_resources` has already been resolved to local indices by the
    /// time `on_tasklist` sees it). A `Wrap`-mode deployment is expected to
    /// configure its `resources:` list with the same names the upstream
    /// scheduler uses, so the round trip through `resolve_resource` and back
    /// through `resource_name` is lossless.
    core: Arc<SchedulerCore>,
}

impl WrapPolicy {
    pub fn new(state: Arc<WrapState>, adapter: Arc<ConnectionAdapter>, core: Arc<SchedulerCore>) -> Self {
        WrapPolicy { state, adapter, core }
    }

    fn upstream_id(&self, local_id: TaskId) -> Option<TaskId> {
        self.state.inner.lock().unwrap().local_to_upstream.get(&local_id).copied()
    }
}

impl SchedPolicy for WrapPolicy {
    fn on_tasklist(&self, specs: Vec<NewTaskSpec>) {
        let tasks: Vec<TaskSpecWire> = specs
            .iter()
            .map(|spec| TaskSpecWire {
                name: spec.name.clone(),
                size: spec.size,
                checkpoints: spec.checkpoints,
                resources: spec
                    .valid_resources
                    .iter()
                    .filter_map(|&r| self.core.resource_name(r).map(str::to_string))
                    .collect(),
                dependencies: spec.dependencies.iter().map(|d| *d as i64).collect(),
            })
            .collect();
        let count = tasks.len();
        self.state.inner.lock().unwrap().pending.push_back(PendingTasklist {
            adapter: self.adapter.clone(),
            count,
        });
        self.state.send_upstream(ClientMessage::TaskList { tasks });
    }

    fn on_started(&self, id: TaskId) {
        if let Some(upstream_id) = self.upstream_id(id) {
            self.state.send_upstream(ClientMessage::TaskStarted { id: upstream_id });
        }
    }

    fn on_suspended(&self, id: TaskId, progress: u32) {
        if let Some(upstream_id) = self.upstream_id(id) {
            self.state.send_upstream(ClientMessage::TaskSuspended { id: upstream_id, progress });
        }
    }

    fn on_finished(&self, id: TaskId) {
        if let Some(upstream_id) = self.upstream_id(id) {
            self.state.send_upstream(ClientMessage::TaskFinished { id: upstream_id });
            let mut inner = self.state.inner.lock().unwrap();
            inner.local_to_upstream.remove(&id);
            inner.upstream_to_local.remove(&upstream_id);
        }
    }

    fn on_progress(&self, id: TaskId, progress: u32) {
        if let Some(upstream_id) = self.upstream_id(id) {
            self.state.send_upstream(ClientMessage::Progress { id: upstream_id, progress });
        }
    }

    fn on_quit(&self) {
        self.adapter.close();
    }

    fn on_fail(&self, reason: &str) {
        warn!(reason, "wrap connection failed");
    }

    fn on_disconnect(&self) {
        self.adapter.close();
        // The local application vanished; the upstream scheduler still owns
        // whatever it was running. Stop routing replies to it rather than
        // aborting upstream, since the reference client has no signal to
        // distinguish "disconnected" from "finished and about to reconnect".
        let mut inner = self.state.inner.lock().unwrap();
        let dead: Vec<TaskId> = inner
            .upstream_to_local
            .iter()
            .filter(|(_, (_, adapter))| Arc::ptr_eq(adapter, &self.adapter))
            .map(|(upstream_id, _)| *upstream_id)
            .collect();
        for upstream_id in dead {
            if let Some((local_id, _)) = inner.upstream_to_local.remove(&upstream_id) {
                inner.local_to_upstream.remove(&local_id);
            }
        }
    }
}
