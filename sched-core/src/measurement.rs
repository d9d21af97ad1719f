//! Measurement collection (resolved Open Question): an optional hook for
//! recording per-task progress samples, standing in for the reference's
//! ad hoc measurement-file writer. Defaults to a no-op so resources that
//! aren't being profiled pay nothing for it.

use crate::task::{ResourceId, TaskId};

pub trait MeasurementCollector: Send + Sync {
    fn record_progress(&self, task: TaskId, resource: ResourceId, progress: u32);
    /// A schedule computation completed; `duration_ms` is wall-clock time
    /// spent inside `Algorithm::compute`.
    fn record_schedule_computed(&self, schedule_id: u64, duration_ms: u64);
}

pub struct NullMeasurementCollector;

impl MeasurementCollector for NullMeasurementCollector {
    fn record_progress(&self, _task: TaskId, _resource: ResourceId, _progress: u32) {}
    fn record_schedule_computed(&self, _schedule_id: u64, _duration_ms: u64) {}
}
