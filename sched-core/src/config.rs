//! Configuration (C10): loads and validates the YAML file named by
//! `SCHED_CONFIG` (default `config.yml`).
//!
//! The shape mirrors the original's static resource table and
//! `sTaskRunUntil` global, but expressed as data rather than compiled-in
//! constants, and in YAML rather than the original's ad hoc ini-ish format.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::computer::ComputerInterruptMode;
use crate::error::ConfigError;

fn default_socket_path() -> String {
    "/tmp/sched.sock".to_string()
}

fn default_algorithm() -> String {
    "linear".to_string()
}

fn default_computer_interrupt_mode() -> ComputerInterruptMode {
    ComputerInterruptMode::NoInterrupt
}

fn default_task_run_until() -> TaskRunUntilMode {
    TaskRunUntilMode::ProgressSuspend
}

fn default_progress_timeout_secs() -> u64 {
    5
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_graceful_shutdown_timeout_secs() -> u64 {
    10
}

fn default_channel_buffer_size() -> usize {
    64
}

fn default_retry_end_hook_on_idle() -> bool {
    false
}

fn default_computer_required_applications() -> usize {
    0
}

fn default_executor_idle_reschedule() -> bool {
    false
}

/// Process-wide policy for how far a started task is told to run before
/// yielding. Corresponds to the original's `static ETaskRunUntil
/// sTaskRunUntil` — one value for the whole scheduler, not per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunUntilMode {
    /// `TASK_START` carries the next checkpoint as `target_progress`; the
    /// resource yields back once it reaches it.
    ProgressSuspend,
    /// `TASK_START` carries no checkpoint target; a per-resource timer fires
    /// after the estimated duration and suspends the task itself.
    EstimationTimer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default = "default_retry_end_hook_on_idle")]
    pub retry_end_hook_on_idle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    pub resources: Vec<ResourceConfig>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_computer_interrupt_mode")]
    pub computer_interrupt_mode: ComputerInterruptMode,
    #[serde(default = "default_task_run_until")]
    pub task_run_until: TaskRunUntilMode,
    #[serde(default = "default_progress_timeout_secs")]
    pub progress_timeout_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Minimum number of registered applications before a `COMPUTER_UPDATE`
    /// trigger is honored. Corresponds to the original's
    /// `mRequiredApplicationCount`/`mRegisteredApplications` gate; `0` means
    /// "no gate, compute on the first trigger".
    #[serde(default = "default_computer_required_applications")]
    pub computer_required_applications: usize,
    /// When the executor goes idle with unfinished tasks remaining and no
    /// schedule entry claims any resource, trigger a fresh computation
    /// instead of waiting for the next external event. Corresponds to the
    /// original's `mReschedule` (`"executor_idle_reschedule"` config key).
    #[serde(default = "default_executor_idle_reschedule")]
    pub executor_idle_reschedule: bool,
    /// When set, this scheduler runs in `Wrap` mode: local application
    /// clients still connect to `socket_path` as usual, but every TASKLIST
    /// and lifecycle message is forwarded to the scheduler listening on this
    /// upstream socket instead of being placed locally. Corresponds to the
    /// original's distinction between `CComUnixSchedClientMain` and
    /// `CComUnixSchedClientWrap`.
    #[serde(default)]
    pub upstream_socket: Option<String>,
}

impl SchedulerConfig {
    pub fn from_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text, &path.display().to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.resources.is_empty() {
            return Err(ConfigError::NoResources);
        }
        for (index, resource) in self.resources.iter().enumerate() {
            if resource.name.trim().is_empty() {
                return Err(ConfigError::ResourceMissingName { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = "resources:\n  - name: gpu0\n  - name: gpu1\n    retry_end_hook_on_idle: true\n";
        let config = SchedulerConfig::from_str(yaml, "test").unwrap();
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.socket_path, default_socket_path());
        assert!(config.resources[1].retry_end_hook_on_idle);
        assert!(!config.resources[0].retry_end_hook_on_idle);
    }

    #[test]
    fn rejects_empty_resource_list() {
        let yaml = "resources: []\n";
        assert!(matches!(SchedulerConfig::from_str(yaml, "test"), Err(ConfigError::NoResources)));
    }

    #[test]
    fn rejects_blank_resource_name() {
        let yaml = "resources:\n  - name: \"\"\n";
        assert!(matches!(
            SchedulerConfig::from_str(yaml, "test"),
            Err(ConfigError::ResourceMissingName { index: 0 })
        ));
    }
}
