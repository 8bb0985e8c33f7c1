use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use task_broker_core::{Command, ComputationEngine};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Background loop that repeatedly runs the engine and posts results.
///
/// Cancellation is level-triggered: a unit of work already in flight
/// completes (and is still posted) before the loop observes the signal.
pub struct ProductionLoop {
    cancel_token: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl ProductionLoop {
    /// Start producing results under the version current at spawn time.
    pub fn spawn<E: ComputationEngine>(
        engine: Arc<Mutex<E>>,
        version: Arc<AtomicU32>,
        outbox: mpsc::Sender<Command>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let task_handle = tokio::spawn(async move {
            // Every result is tagged with the version the loop started
            // under, even if a reconfiguration lands mid-compute.
            let started_under = version.load(Ordering::SeqCst);

            while !token.is_cancelled() {
                let produced = engine.lock().await.compute().await;
                let data = match produced {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "compute failed, skipping this unit of work");
                        continue;
                    }
                };

                // Emission-time currency check: a reconfiguration that
                // landed while computing makes this result stale.
                if version.load(Ordering::SeqCst) != started_under {
                    debug!(version = started_under, "discarding stale result");
                    continue;
                }

                if outbox
                    .send(Command::Post {
                        version: started_under,
                        data,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Self {
            cancel_token,
            task_handle,
        }
    }

    /// Signal the loop and wait for it to fully exit. After this returns
    /// no further results can be posted by the stopped loop.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task_handle.await {
            warn!(error = %e, "production loop task failed");
        }
    }
}
