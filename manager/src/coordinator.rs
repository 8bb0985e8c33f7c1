use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use task_broker_core::Command;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::accumulator::ResultAccumulator;
use crate::registry::{WorkerHandle, WorkerRegistry};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("dispatch timed out after {limit:?} with {collected} of {target} results")]
    Timeout {
        limit: Duration,
        collected: usize,
        target: usize,
    },
}

/// Orchestrates one broadcast-and-collect cycle at a time over the
/// registered worker pool.
pub struct Coordinator {
    registry: WorkerRegistry,
    timeout: Option<Duration>,
    // One task in flight at a time; overlapping callers queue here.
    dispatch_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(registry: WorkerRegistry, timeout: Option<Duration>) -> Self {
        Self {
            registry,
            timeout,
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Broadcast `configuration` to every currently registered worker and
    /// collect `count` results.
    ///
    /// The participant set is the registry snapshot taken here; workers
    /// connecting later are not included and workers disconnecting
    /// mid-dispatch simply stop contributing. An empty participant set
    /// still waits — without a timeout configured the dispatch then never
    /// completes.
    pub async fn launch_task(
        &self,
        configuration: Bytes,
        count: usize,
    ) -> Result<Vec<Bytes>, TaskError> {
        let _in_flight = self.dispatch_lock.lock().await;

        if count == 0 {
            return Ok(Vec::new());
        }

        let participants = self.registry.snapshot();
        if participants.is_empty() {
            warn!("dispatch started with no workers connected; waiting for results that may never arrive");
        }
        info!(count, participants = participants.len(), "launching task");

        let accumulator = Arc::new(ResultAccumulator::new(count));

        for worker in &participants {
            // Sink first, then the version bump that invalidates anything
            // still arriving under the previous configuration.
            worker.set_sink(accumulator.clone());
            let version = worker.next_version();
            let delivered = worker
                .send(Command::Configure {
                    version,
                    blob: configuration.clone(),
                })
                .await
                && worker.send(Command::Work).await;
            if !delivered {
                debug!(worker = %worker.id(), "worker went away during configuration");
            }
        }

        let results = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, accumulator.wait_complete()).await {
                    Ok(results) => results,
                    Err(_) => {
                        let collected = accumulator.len();
                        self.stand_down(&participants).await;
                        return Err(TaskError::Timeout {
                            limit,
                            collected,
                            target: count,
                        });
                    }
                }
            }
            None => accumulator.wait_complete().await,
        };

        self.stand_down(&participants).await;

        info!(collected = results.len(), "task complete");
        Ok(results)
    }

    /// Stop every participant in the snapshot, contributors or not, and
    /// detach them from the finished dispatch.
    async fn stand_down(&self, participants: &[Arc<WorkerHandle>]) {
        for worker in participants {
            worker.clear_sink();
            if !worker.send(Command::Stop).await {
                debug!(worker = %worker.id(), "worker went away before stop");
            }
        }
    }

    /// Tell every connected worker process to terminate. Used when the
    /// manager itself shuts down.
    pub async fn terminate_workers(&self) {
        for worker in self.registry.snapshot() {
            if !worker.send(Command::Die).await {
                debug!(worker = %worker.id(), "worker already gone");
            }
        }
    }
}
