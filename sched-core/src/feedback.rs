//! Feedback Rendezvous (C3): blocks a calling thread on a progress reply
//! from a specific resource, without blocking the resource's own event loop.
//!
//! Grounded in the original's condition-variable rendezvous between
//! `CFeedbackMain` (waiting for progress before it can schedule around a
//! running task) and `CResource` (which receives the PROGRESS reply
//! asynchronously off the wire). Unlike the rest of the control plane this
//! stays a genuine OS-thread block on `std::sync::Condvar`, not a tokio
//! `Notify`: [`crate::computer::Computer::compute_once`] is called both from
//! an async tokio worker and from the simulator's plain synchronous
//! `fn main` (no runtime at all), so the rendezvous itself can't depend on
//! one existing.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    progress: Option<u32>,
    stopped: bool,
}

/// One per in-flight "what's your progress" request. Dropped once answered.
pub struct Feedback {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Feedback {
    pub fn new() -> Self {
        Feedback {
            inner: Mutex::new(Inner {
                progress: None,
                stopped: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread for [`Feedback::got_progress`] or
    /// [`Feedback::stop`], whichever comes first, up to `timeout`. Returns
    /// `None` if stopped or timed out before an answer arrived.
    pub fn get_progress_timeout(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.progress.is_some() || inner.stopped {
                return inner.progress;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.condvar.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if result.timed_out() && inner.progress.is_none() && !inner.stopped {
                return None;
            }
        }
    }

    pub fn got_progress(&self, progress: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.progress = Some(progress);
        drop(inner);
        self.condvar.notify_all();
    }

    /// Unblocks any waiter without an answer, e.g. the task aborted or its
    /// client disconnected before replying.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        drop(inner);
        self.condvar.notify_all();
    }
}

impl Default for Feedback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delivers_progress_to_waiter() {
        let fb = Arc::new(Feedback::new());
        let waiter = {
            let fb = fb.clone();
            std::thread::spawn(move || fb.get_progress_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(10));
        fb.got_progress(42);
        assert_eq!(waiter.join().unwrap(), Some(42));
    }

    #[test]
    fn stop_unblocks_without_an_answer() {
        let fb = Arc::new(Feedback::new());
        let waiter = {
            let fb = fb.clone();
            std::thread::spawn(move || fb.get_progress_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(10));
        fb.stop();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn times_out_without_an_answer() {
        let fb = Feedback::new();
        assert_eq!(fb.get_progress_timeout(Duration::from_millis(20)), None);
    }
}
