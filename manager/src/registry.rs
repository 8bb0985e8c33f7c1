use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use task_broker_core::{Command, INITIAL_VERSION};
use tokio::sync::mpsc;
use tracing::debug;

use crate::accumulator::ResultAccumulator;

/// Identity of one worker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Manager-side state for one connected worker.
///
/// The version is bumped by the coordinator on every dispatch and read by
/// the connection driver when validating incoming results; the sink slot
/// points at the accumulator of the dispatch currently in flight.
pub struct WorkerHandle {
    id: WorkerId,
    version: AtomicU32,
    outbox: mpsc::Sender<Command>,
    sink: Mutex<Option<Arc<ResultAccumulator>>>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, outbox: mpsc::Sender<Command>) -> Self {
        Self {
            id,
            version: AtomicU32::new(INITIAL_VERSION),
            outbox,
            sink: Mutex::new(None),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Bump the version for a new configuration and return the new value.
    pub fn next_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Point incoming results at the accumulator of a new dispatch.
    pub fn set_sink(&self, accumulator: Arc<ResultAccumulator>) {
        *self.sink.lock().unwrap() = Some(accumulator);
    }

    pub fn clear_sink(&self) {
        *self.sink.lock().unwrap() = None;
    }

    /// Deliver one POST received from this worker. A result tagged with
    /// anything but the current version is stale and silently dropped.
    pub fn deliver(&self, version: u32, data: Bytes) {
        let current = self.version();
        if version != current {
            debug!(worker = %self.id, version, current, "discarding stale result");
            return;
        }
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(accumulator) => {
                if !accumulator.push(data) {
                    debug!(worker = %self.id, version, "dispatch already satisfied, dropping result");
                }
            }
            None => debug!(worker = %self.id, version, "no dispatch in flight, dropping result"),
        }
    }

    /// Queue a command for the connection's writer task. Returns false if
    /// the worker has gone away.
    pub async fn send(&self, command: Command) -> bool {
        self.outbox.send(command).await.is_ok()
    }
}

/// Set of currently connected, ready workers.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<Mutex<HashMap<WorkerId, Arc<WorkerHandle>>>>,
    next_id: Arc<AtomicU64>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> WorkerId {
        WorkerId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn register(&self, handle: Arc<WorkerHandle>) {
        self.workers.lock().unwrap().insert(handle.id(), handle);
    }

    /// Idempotent: a worker that never sent READY is simply absent.
    pub fn unregister(&self, id: WorkerId) {
        self.workers.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().unwrap().is_empty()
    }

    /// Membership at call time, for use by one dispatch. The snapshot is
    /// not live: workers connecting afterwards are not included, and
    /// workers disconnecting mid-dispatch are tolerated.
    pub fn snapshot(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.lock().unwrap().values().cloned().collect()
    }
}
