//! Control-plane core shared by the scheduler daemon and the simulation
//! driver: task database, resource coordination, schedule computation and
//! execution, wire protocol, configuration.

pub mod adapter;
pub mod algorithm;
pub mod computer;
pub mod config;
pub mod core;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod feedback;
pub mod measurement;
pub mod protocol;
pub mod resource;
pub mod schedule;
pub mod task;
pub mod task_database;
#[cfg(test)]
mod tests;

pub use adapter::{Adapter, AdapterHandle, OutgoingCommand, SchedPolicy};
pub use algorithm::{Algorithm, LinearAlgorithm};
pub use computer::{Computer, ComputerInterruptMode};
pub use config::{ResourceConfig, SchedulerConfig, TaskRunUntilMode};
pub use core::SchedulerCore;
pub use executor::Executor;
pub use resource::{EndHook, ResourceCoordinator, ResourceSnapshot};
pub use schedule::{Schedule, ScheduleEntry};
pub use task::{OnEnd, ResourceId, Task, TaskCopy, TaskHandle, TaskId, TaskState};
pub use task_database::{NewTaskSpec, TaskDatabase};

/// Result type alias used throughout the core crate.
pub type Result<T> = anyhow::Result<T>;
