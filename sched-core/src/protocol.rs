//! Wire protocol (C9 support): the line-delimited JSON format spoken over
//! the Unix socket.
//!
//! Grounded in `CComUnixSchedClient::initClient`/`readVer1`/`processVer1`/
//! `writeMessage`. Framing: every message is a JSON object terminated by a
//! single `0x00` byte; the read buffer starts at [`INITIAL_BUFFER_SIZE`] and
//! doubles up to [`MAX_BUFFER_SIZE`], past which the connection is closed.
//! The handshake is `PROTOCOL=<n>\0`; a legacy peer that instead opens with
//! `'S'` is accepted but never upgraded past the inert v0 dialect.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::task::{OnEnd, TaskId};
use crate::task_database::NewTaskSpec;

pub const CURRENT_PROTOCOL_VERSION: i64 = 1;
pub const INITIAL_BUFFER_SIZE: usize = 1024;
pub const MAX_BUFFER_SIZE: usize = 4096;
pub const LEGACY_HANDSHAKE_BYTE: u8 = b'S';
pub const HANDSHAKE_PREFIX: &str = "PROTOCOL=";
pub const RECORD_TERMINATOR: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnEndWire {
    #[serde(rename = "SUSPEND")]
    Suspend,
    #[serde(rename = "CONTINUE")]
    Continue,
}

impl From<OnEnd> for OnEndWire {
    fn from(value: OnEnd) -> Self {
        match value {
            OnEnd::Suspend => OnEndWire::Suspend,
            OnEnd::Continue => OnEndWire::Continue,
        }
    }
}

impl From<OnEndWire> for OnEnd {
    fn from(value: OnEndWire) -> Self {
        match value {
            OnEndWire::Suspend => OnEnd::Suspend,
            OnEndWire::Continue => OnEnd::Continue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpecWire {
    pub name: String,
    pub size: u64,
    pub checkpoints: u32,
    pub resources: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<i64>,
}

/// Messages a client sends to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum ClientMessage {
    #[serde(rename = "TASKLIST")]
    TaskList { tasks: Vec<TaskSpecWire> },
    #[serde(rename = "TASK_STARTED")]
    TaskStarted { id: TaskId },
    #[serde(rename = "TASK_SUSPENDED")]
    TaskSuspended { id: TaskId, progress: u32 },
    #[serde(rename = "TASK_FINISHED")]
    TaskFinished { id: TaskId },
    #[serde(rename = "PROGRESS")]
    Progress { id: TaskId, progress: u32 },
    #[serde(rename = "QUIT")]
    Quit {},
}

/// Messages the scheduler sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum ServerMessage {
    #[serde(rename = "TASK_START")]
    TaskStart {
        id: TaskId,
        resource: String,
        target_progress: Option<u32>,
        on_end: OnEndWire,
    },
    #[serde(rename = "TASK_SUSPEND")]
    TaskSuspend { id: TaskId },
    #[serde(rename = "TASK_ABORT")]
    TaskAbort { id: TaskId },
    #[serde(rename = "TASK_PROGRESS")]
    TaskProgress { id: TaskId },
    #[serde(rename = "TASKIDS")]
    TaskIds { ids: Vec<TaskId> },
    #[serde(rename = "QUIT")]
    Quit {},
}

/// Encodes one server message plus its terminating `0x00`.
pub fn encode(message: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    buf.push(RECORD_TERMINATOR);
    Ok(buf)
}

/// Encodes one client message plus its terminating `0x00` — used by the
/// `Wrap` policy, which speaks the client side of this same protocol to an
/// upstream scheduler.
pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    buf.push(RECORD_TERMINATOR);
    Ok(buf)
}

/// Parses one complete record (the bytes up to, but not including, its
/// `0x00` terminator).
pub fn decode_client_message(record: &[u8]) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_slice(record).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
}

/// The `Wrap` counterpart of [`decode_client_message`]: parses a record
/// arriving from the upstream scheduler this instance is a client of.
pub fn decode_server_message(record: &[u8]) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_slice(record).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
}

/// The handshake bytes a client sends to open a versioned connection.
pub fn handshake_bytes(version: i64) -> Vec<u8> {
    let mut buf = format!("{HANDSHAKE_PREFIX}{version}").into_bytes();
    buf.push(RECORD_TERMINATOR);
    buf
}

/// Outcome of inspecting the bytes received so far for a handshake.
pub enum Handshake {
    /// Not enough bytes yet to decide.
    Incomplete,
    /// A legacy peer (opens with `'S'`); protocol version 0, inert.
    Legacy,
    /// `PROTOCOL=<n>` parsed at the given byte length.
    Versioned { version: i64, consumed: usize },
}

/// Scans `buf` for a handshake. Mirrors `initClient`: first byte `'S'` means
/// legacy, otherwise look for a `PROTOCOL=<digits>` prefix terminated by
/// `0x00`.
pub fn parse_handshake(buf: &[u8]) -> Result<Handshake, ProtocolError> {
    if buf.is_empty() {
        return Ok(Handshake::Incomplete);
    }
    if buf[0] == LEGACY_HANDSHAKE_BYTE {
        return Ok(Handshake::Legacy);
    }
    let Some(term) = buf.iter().position(|&b| b == RECORD_TERMINATOR) else {
        if buf.len() >= MAX_BUFFER_SIZE {
            return Err(ProtocolError::RecordTooLarge);
        }
        return Ok(Handshake::Incomplete);
    };
    let text = std::str::from_utf8(&buf[..term]).map_err(|_| ProtocolError::MalformedJson("non-utf8 handshake".into()))?;
    let version_str = text
        .strip_prefix(HANDSHAKE_PREFIX)
        .ok_or_else(|| ProtocolError::MalformedJson(format!("unrecognized handshake {text:?}")))?;
    let version: i64 = version_str
        .parse()
        .map_err(|_| ProtocolError::MalformedJson(format!("non-numeric protocol version {version_str:?}")))?;
    if version < 1 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(Handshake::Versioned {
        version,
        consumed: term + 1,
    })
}

/// Validates a TASKLIST batch per-record, mirroring `processVer1`'s TASKLIST
/// handling: every task needs at least one resource that survives mapping
/// through `resolve_resource`, and every dependency index must point
/// strictly earlier in the same batch. The whole batch is rejected (and the
/// caller should simply drop it, not the connection) if any task fails.
pub fn validate_tasklist(
    tasks: &[TaskSpecWire],
    resolve_resource: impl Fn(&str) -> Option<usize>,
) -> Result<Vec<NewTaskSpec>, ProtocolError> {
    let mut specs = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        let valid_resources: Vec<usize> = task.resources.iter().filter_map(|r| resolve_resource(r)).collect();
        if valid_resources.is_empty() {
            return Err(ProtocolError::NoValidResources);
        }
        let mut dependencies = Vec::with_capacity(task.dependencies.len());
        for &dep in &task.dependencies {
            if dep < 0 || dep as usize >= index {
                return Err(ProtocolError::InvalidDependencyIndex { index, dep });
            }
            dependencies.push(dep as usize);
        }
        specs.push(NewTaskSpec {
            name: task.name.clone(),
            size: task.size,
            checkpoints: task.checkpoints,
            valid_resources,
            dependencies,
        });
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_parses_versioned_prefix() {
        let mut buf = b"PROTOCOL=1".to_vec();
        buf.push(RECORD_TERMINATOR);
        match parse_handshake(&buf).unwrap() {
            Handshake::Versioned { version, consumed } => {
                assert_eq!(version, 1);
                assert_eq!(consumed, buf.len());
            }
            _ => panic!("expected versioned handshake"),
        }
    }

    #[test]
    fn handshake_rejects_version_zero() {
        let mut buf = b"PROTOCOL=0".to_vec();
        buf.push(RECORD_TERMINATOR);
        assert!(matches!(parse_handshake(&buf), Err(ProtocolError::UnsupportedVersion(0))));
    }

    #[test]
    fn handshake_recognizes_legacy_byte() {
        let buf = b"Shello".to_vec();
        assert!(matches!(parse_handshake(&buf).unwrap(), Handshake::Legacy));
    }

    #[test]
    fn tasklist_rejects_forward_dependency() {
        let tasks = vec![
            TaskSpecWire {
                name: "a".into(),
                size: 1,
                checkpoints: 1,
                resources: vec!["gpu0".into()],
                dependencies: vec![1],
            },
            TaskSpecWire {
                name: "b".into(),
                size: 1,
                checkpoints: 1,
                resources: vec!["gpu0".into()],
                dependencies: vec![],
            },
        ];
        let result = validate_tasklist(&tasks, |_| Some(0));
        assert!(matches!(result, Err(ProtocolError::InvalidDependencyIndex { .. })));
    }

    #[test]
    fn tasklist_rejects_all_unknown_resources() {
        let tasks = vec![TaskSpecWire {
            name: "a".into(),
            size: 1,
            checkpoints: 1,
            resources: vec!["nope".into()],
            dependencies: vec![],
        }];
        let result = validate_tasklist(&tasks, |_| None);
        assert!(matches!(result, Err(ProtocolError::NoValidResources)));
    }

    #[test]
    fn round_trips_task_start() {
        let msg = ServerMessage::TaskStart {
            id: 7,
            resource: "gpu0".into(),
            target_progress: Some(3),
            on_end: OnEndWire::Suspend,
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(*bytes.last().unwrap(), RECORD_TERMINATOR);
    }
}
