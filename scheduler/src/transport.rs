//! Unix-socket transport (C9): accepts client connections and speaks the
//! line-delimited JSON protocol over them.
//!
//! Grounded in `CComUnixServer`/`CComUnixSchedClient::initClient`/`readVer1`.
//! The original multiplexes every connection through one `poll(2)` loop with
//! a self-pipe wakeup; here each connection gets its own pair of tokio
//! tasks (reader, writer) instead, which is the ordinary async-Rust
//! re-expression of the same "don't block the whole server on one slow
//! peer" requirement.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sched_core::adapter::SchedPolicy;
use sched_core::protocol::{self, ClientMessage, Handshake};
use sched_core::SchedulerCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::policy::{ConnectionAdapter, MainPolicy};
use crate::wrap::{WrapPolicy, WrapState};

pub async fn serve(core: Arc<SchedulerCore>, socket_path: &Path, wrap: Option<Arc<WrapState>>) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("failed to remove stale socket at {}", socket_path.display()))?;
    }
    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind unix socket at {}", socket_path.display()))?;
    info!(path = %socket_path.display(), wrap = wrap.is_some(), "listening for clients");

    loop {
        let (stream, _addr) = listener.accept().await.context("accept failed")?;
        let core = core.clone();
        let wrap = wrap.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(core, stream, wrap).await {
                warn!(error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(core: Arc<SchedulerCore>, stream: UnixStream, wrap: Option<Arc<WrapState>>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = ConnectionAdapter::new(tx);
    let policy: Arc<dyn SchedPolicy> = match wrap {
        Some(state) => Arc::new(WrapPolicy::new(state, adapter.clone(), core.clone())),
        None => Arc::new(MainPolicy::new(core.clone(), adapter.clone())),
    };

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match protocol::encode(&msg) {
                Ok(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outgoing message"),
            }
        }
    });

    let mut buf: Vec<u8> = Vec::with_capacity(protocol::INITIAL_BUFFER_SIZE);
    if !read_handshake(&mut reader, &mut buf).await? {
        policy.on_disconnect();
        writer_task.abort();
        return Ok(());
    }

    loop {
        match read_record(&mut reader, &mut buf).await {
            Ok(Some(record)) => {
                if let Err(e) = dispatch_record(&core, &policy, &record) {
                    warn!(error = %e, "dropping malformed record");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "read error, closing connection");
                break;
            }
        }
    }

    policy.on_disconnect();
    writer_task.abort();
    Ok(())
}

/// Consumes the handshake prefix from `buf`/the socket. Returns `false` if
/// the peer disconnected before completing one.
async fn read_handshake(reader: &mut (impl tokio::io::AsyncRead + Unpin), buf: &mut Vec<u8>) -> Result<bool> {
    loop {
        match protocol::parse_handshake(buf)? {
            Handshake::Incomplete => {
                if !fill(reader, buf).await? {
                    return Ok(false);
                }
            }
            Handshake::Legacy => {
                buf.drain(..1);
                debug!("legacy (v0) handshake accepted, protocol stays inert");
                return Ok(true);
            }
            Handshake::Versioned { version, consumed } => {
                buf.drain(..consumed);
                debug!(version, "versioned handshake accepted");
                return Ok(true);
            }
        }
    }
}

async fn read_record(reader: &mut (impl tokio::io::AsyncRead + Unpin), buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == protocol::RECORD_TERMINATOR) {
            let record = buf[..pos].to_vec();
            buf.drain(..=pos);
            return Ok(Some(record));
        }
        if buf.len() >= protocol::MAX_BUFFER_SIZE {
            anyhow::bail!("record exceeds {} bytes without a terminator", protocol::MAX_BUFFER_SIZE);
        }
        if !fill(reader, buf).await? {
            return Ok(None);
        }
    }
}

async fn fill(reader: &mut (impl tokio::io::AsyncRead + Unpin), buf: &mut Vec<u8>) -> Result<bool> {
    let mut chunk = [0u8; 1024];
    let n = reader.read(&mut chunk).await.context("socket read failed")?;
    if n == 0 {
        return Ok(false);
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(true)
}

fn dispatch_record(core: &Arc<SchedulerCore>, policy: &Arc<dyn SchedPolicy>, record: &[u8]) -> Result<()> {
    let message = protocol::decode_client_message(record)?;
    match message {
        ClientMessage::TaskList { tasks } => {
            let core = core.clone();
            match protocol::validate_tasklist(&tasks, |name| core.resource_id_by_name(name)) {
                Ok(specs) => policy.on_tasklist(specs),
                Err(e) => policy.on_fail(&e.to_string()),
            }
        }
        ClientMessage::TaskStarted { id } => policy.on_started(id),
        ClientMessage::TaskSuspended { id, progress } => policy.on_suspended(id, progress),
        ClientMessage::TaskFinished { id } => policy.on_finished(id),
        ClientMessage::Progress { id, progress } => policy.on_progress(id, progress),
        ClientMessage::Quit {} => policy.on_quit(),
    }
    Ok(())
}
