//! The simulated client (C12): answers every `OutgoingCommand` the way a
//! well-behaved application would, but instantly and on the logical clock
//! instead of over a socket.
//!
//! Grounded in `CSimQueue`, which plays the same role in the original —
//! it implements `CComSchedClient` so the scheduler core can treat the
//! whole simulation as "one client" that owns every task. The original
//! models a STARTING phase (`taskTimeInit`) before a task is considered
//! running; this driver folds that into the single completion event below,
//! which is a deliberate simplification (no `CEstimation` source was
//! available to port faithfully) noted in the design ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sched_core::adapter::{Adapter, OutgoingCommand};
use sched_core::task::TaskId;
use sched_core::task_database::NewTaskSpec;
use tracing::debug;

use crate::sim_queue::{SimEvent, SimQueue};

pub struct SimAdapter {
    queue: Arc<Mutex<SimQueue>>,
    current_tick: Arc<AtomicU64>,
    task_specs: Mutex<HashMap<TaskId, (u64, u32)>>,
    closed: AtomicBool,
}

impl SimAdapter {
    pub fn new(queue: Arc<Mutex<SimQueue>>, current_tick: Arc<AtomicU64>) -> Arc<Self> {
        Arc::new(SimAdapter {
            queue,
            current_tick,
            task_specs: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Records `(size, checkpoints)` for a freshly registered batch so
    /// `enqueue` can compute a completion tick without re-locking a task
    /// that may still be held by the caller (`ResourceCoordinator::start`).
    pub fn record_task_specs(&self, ids: &[TaskId], specs: &[NewTaskSpec]) {
        let mut map = self.task_specs.lock().unwrap();
        for (id, spec) in ids.iter().zip(specs) {
            map.insert(*id, (spec.size, spec.checkpoints));
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Adapter for SimAdapter {
    fn enqueue(&self, cmd: OutgoingCommand) {
        match cmd {
            OutgoingCommand::Start {
                task_id,
                target_progress,
                ..
            } => {
                let (size, checkpoints) = self
                    .task_specs
                    .lock()
                    .unwrap()
                    .get(&task_id)
                    .copied()
                    .unwrap_or((1, 1));
                let target = target_progress.unwrap_or(checkpoints);
                let per_checkpoint = if checkpoints == 0 { size } else { size / checkpoints as u64 };
                let duration = (per_checkpoint * target as u64).max(1);
                let tick = self.current_tick.load(Ordering::Acquire) + duration;
                debug!(task_id, tick, "scheduled completion");
                self.queue.lock().unwrap().schedule(tick, SimEvent::TaskComplete { task_id });
            }
            OutgoingCommand::Suspend { task_id } => {
                debug!(task_id, "suspend requested, but the replay driver always runs to completion");
            }
            OutgoingCommand::Abort { task_id } => {
                debug!(task_id, "abort acknowledged");
            }
            OutgoingCommand::Progress { task_id } => {
                debug!(task_id, "progress request ignored, replay driver never polls mid-run");
            }
            OutgoingCommand::TaskIds { .. } => {}
            OutgoingCommand::Quit => self.closed.store(true, Ordering::Release),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
