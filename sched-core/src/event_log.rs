//! Event log (C11): a structured, append-only record of scheduling
//! decisions and task lifecycle transitions, independent of the ordinary
//! diagnostic log.
//!
//! Grounded in `CLogger::eventlog` (a second log stream alongside the main
//! diagnostic one, fed JSON-shaped event records). Re-expressed as a
//! `tracing` target (`"event"`) so the binary crates can route it to its own
//! daily-rolling file via a dedicated `tracing-appender` layer, without a
//! second ad hoc logging implementation.

use tracing::{event, Level};

use crate::task::{ResourceId, TaskId};

pub fn scheduler_start() {
    event!(target: "event", Level::INFO, "SCHEDULER_START");
}

pub fn scheduler_stop() {
    event!(target: "event", Level::INFO, "SCHEDULER_STOP");
}

pub fn resources(names: &[String]) {
    let joined = names.join(",");
    event!(target: "event", Level::INFO, resources = joined.as_str(), "RESOURCES");
}

pub fn algorithm(name: &str) {
    event!(target: "event", Level::INFO, algorithm = name, "ALGORITHM");
}

pub fn task_registered(id: TaskId, name: &str) {
    event!(target: "event", Level::INFO, task = id, name, "NEWTASK");
}

pub fn task_start(id: TaskId, resource: ResourceId, target_progress: Option<u32>) {
    event!(target: "event", Level::INFO, task = id, resource, target_progress, "TASK_START");
}

pub fn task_started(id: TaskId, resource: ResourceId) {
    event!(target: "event", Level::INFO, task = id, resource, "TASK_STARTED");
}

pub fn task_suspend(id: TaskId) {
    event!(target: "event", Level::INFO, task = id, "TASK_SUSPEND");
}

pub fn task_suspended(id: TaskId, progress: u32) {
    event!(target: "event", Level::INFO, task = id, progress, "TASK_SUSPENDED");
}

pub fn task_abort(id: TaskId) {
    event!(target: "event", Level::INFO, task = id, "TASK_ABORT");
}

pub fn task_finished(id: TaskId) {
    event!(target: "event", Level::INFO, task = id, "TASK_FINISHED");
}

pub fn task_aborted(id: TaskId, cascaded_from: Option<TaskId>) {
    event!(target: "event", Level::INFO, task = id, cascaded_from, "TASK_ABORTED");
}

pub fn task_getprogress(id: TaskId) {
    event!(target: "event", Level::INFO, task = id, "TASK_GETPROGRESS");
}

pub fn task_gotprogress(id: TaskId, progress: u32) {
    event!(target: "event", Level::INFO, task = id, progress, "TASK_GOTPROGRESS");
}

pub fn end_task(id: TaskId) {
    event!(target: "event", Level::INFO, task = id, "ENDTASK");
}

pub fn resource_idle(id: ResourceId, name: &str) {
    event!(target: "event", Level::INFO, resource = id, name, "RESOURCE_IDLE");
}

pub fn client_connected(peer: &str) {
    event!(target: "event", Level::INFO, peer, "CLIENT_CONNECTED");
}

pub fn client_disconnected(peer: &str) {
    event!(target: "event", Level::INFO, peer, "CLIENT_DISCONNECTED");
}

pub fn computer_update() {
    event!(target: "event", Level::INFO, "COMPUTER_UPDATE");
}

pub fn computer_algostart(schedule_id: u64) {
    event!(target: "event", Level::INFO, schedule_id, "COMPUTER_ALGOSTART");
}

pub fn computer_algostop(schedule_id: u64) {
    event!(target: "event", Level::INFO, schedule_id, "COMPUTER_ALGOSTOP");
}

pub fn schedule_computed(schedule_id: u64, entry_count: usize, duration_ms: u64) {
    event!(
        target: "event",
        Level::INFO,
        schedule_id,
        entries = entry_count,
        duration_ms,
        "SCHEDULE"
    );
}

pub fn executor_newschedule(schedule_id: u64) {
    event!(target: "event", Level::INFO, schedule_id, "EXECUTOR_NEWSCHEDULE");
}

pub fn executor_resume() {
    event!(target: "event", Level::INFO, "EXECUTOR_RESUME");
}

pub fn executor_suspend() {
    event!(target: "event", Level::INFO, "EXECUTOR_SUSPEND");
}

pub fn executor_suspended() {
    event!(target: "event", Level::INFO, "EXECUTOR_SUSPENDED");
}

pub fn executor_idle_reschedule() {
    event!(target: "event", Level::INFO, "EXECUTOR_IDLE_RESCHEDULE");
}

pub fn feedback_getprogress() {
    event!(target: "event", Level::INFO, "FEEDBACK_GETPROGRESS");
}

pub fn feedback_gotprogress() {
    event!(target: "event", Level::INFO, "FEEDBACK_GOTPROGRESS");
}
