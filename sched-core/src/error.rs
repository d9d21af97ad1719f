//! Error types for the control-plane core.
//!
//! Mirrors the error-kind taxonomy of the scheduler's error handling design:
//! protocol errors, transport errors, configuration errors and task-database
//! rejections each get their own enum so callers can branch on what actually
//! went wrong instead of matching on strings.

use thiserror::Error;

/// Errors from [`crate::task_database::TaskDatabase`] operations.
#[derive(Debug, Error)]
pub enum TaskDatabaseError {
    #[error("task at list index {index} depends on index {dep}, which is not strictly before it")]
    InvalidDependency { index: usize, dep: i64 },
}

/// Errors surfaced while parsing or acting on wire protocol records.
///
/// Per the error handling design, most of these are logged and the offending
/// message (or whole TASKLIST group) is dropped rather than closing the
/// connection; [`ProtocolError::RecordTooLarge`] is the one variant that
/// does close the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    MalformedJson(String),
    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),
    #[error("task references unknown resource `{0}`")]
    UnknownResource(String),
    #[error("task has no valid resources after filtering unknown ones")]
    NoValidResources,
    #[error("dependency index {dep} is not strictly before task index {index}")]
    InvalidDependencyIndex { index: usize, dep: i64 },
    #[error("record exceeds the maximum buffer size")]
    RecordTooLarge,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i64),
}

/// Errors while loading [`crate::config::SchedulerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("resource entry #{index} is missing a name")]
    ResourceMissingName { index: usize },
    #[error("resource list must not be empty")]
    NoResources,
}
