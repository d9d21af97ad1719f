//! Logical-clock event queue (C12): the simulation driver's replacement for
//! real time. Grounded in `CSimQueue`'s `mQueue`, a list of events kept
//! sorted by timestamp via linear insertion; here a binary heap gives the
//! same "always pop the earliest" behavior without the original's O(n)
//! insert walk.
//!
//! Two event kinds are modeled, a deliberate narrowing of the original's
//! four (`SIMEVENT_NEWTASK`, `SIMEVENT_TASK_CHANGE`, `SIMEVENT_TIMER_END`,
//! `SIMEVENT_ALGO_END`): task arrival and task completion. Schedule
//! computation is synchronous in this driver (`Computer::compute_once`
//! returns a finished schedule directly) so there is no separate
//! "algorithm finished" event to wait on, and the timer event was marked
//! `unused` in the original.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use sched_core::task::TaskId;

use crate::simfile::TaskArrivalBatch;

#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A batch of tasks becomes known to the scheduler at this tick.
    TaskArrival(TaskArrivalBatch),
    /// The task running on its assigned resource reaches its final
    /// checkpoint at this tick.
    TaskComplete { task_id: TaskId },
}

#[derive(Debug, Clone)]
struct QueueEntry {
    tick: u64,
    seq: u64,
    event: SimEvent,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap; reverse both fields so the earliest tick
    // (and, for ties, the earliest-inserted event) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.tick.cmp(&self.tick).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct SimQueue {
    heap: BinaryHeap<QueueEntry>,
    seq: u64,
}

impl SimQueue {
    pub fn new() -> Self {
        SimQueue {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn schedule(&mut self, tick: u64, event: SimEvent) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(QueueEntry { tick, seq, event });
    }

    pub fn pop(&mut self) -> Option<(u64, SimEvent)> {
        self.heap.pop().map(|e| (e.tick, e.event))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for SimQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_tick_order_regardless_of_insertion_order() {
        let mut q = SimQueue::new();
        q.schedule(10, SimEvent::TaskComplete { task_id: 1 });
        q.schedule(3, SimEvent::TaskComplete { task_id: 2 });
        q.schedule(7, SimEvent::TaskComplete { task_id: 3 });

        let (tick, _) = q.pop().unwrap();
        assert_eq!(tick, 3);
        let (tick, _) = q.pop().unwrap();
        assert_eq!(tick, 7);
        let (tick, _) = q.pop().unwrap();
        assert_eq!(tick, 10);
        assert!(q.is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut q = SimQueue::new();
        q.schedule(5, SimEvent::TaskComplete { task_id: 1 });
        q.schedule(5, SimEvent::TaskComplete { task_id: 2 });

        let (_, first) = q.pop().unwrap();
        match first {
            SimEvent::TaskComplete { task_id } => assert_eq!(task_id, 1),
            _ => panic!("wrong event"),
        }
    }
}
