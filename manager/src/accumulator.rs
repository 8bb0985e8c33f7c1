use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

/// Append-only collection of accepted results for one dispatch.
///
/// Connection drivers push validated results from many worker
/// connections; the coordinator suspends on [`wait_complete`] and is
/// woken exactly when the target count is crossed. Once the target is
/// reached the accumulator stops accepting, so a completed dispatch
/// holds exactly `target` results in arrival order.
///
/// [`wait_complete`]: ResultAccumulator::wait_complete
pub struct ResultAccumulator {
    target: usize,
    results: Mutex<Vec<Bytes>>,
    complete: Notify,
}

impl ResultAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            results: Mutex::new(Vec::with_capacity(target)),
            complete: Notify::new(),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one accepted result. Returns false once the target has
    /// already been reached.
    pub fn push(&self, data: Bytes) -> bool {
        let reached = {
            let mut results = self.results.lock().unwrap();
            if results.len() >= self.target {
                return false;
            }
            results.push(data);
            results.len() >= self.target
        };
        if reached {
            self.complete.notify_waiters();
        }
        true
    }

    /// Suspend until the target count has been collected, then take the
    /// results. The wait is a rendezvous: it resumes on the push that
    /// crosses the threshold, never on a timer.
    pub async fn wait_complete(&self) -> Vec<Bytes> {
        loop {
            // Register interest before checking, so a push landing
            // between the check and the await cannot be missed.
            let notified = self.complete.notified();
            if self.results.lock().unwrap().len() >= self.target {
                break;
            }
            notified.await;
        }
        std::mem::take(&mut *self.results.lock().unwrap())
    }
}
