use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use task_broker_core::{Command, CommandCodec, ComputationEngine, INITIAL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::production::ProductionLoop;

const OUTBOX_CAPACITY: usize = 32;

/// Why [`WorkerRuntime::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The manager told this worker process to terminate.
    Terminated,
    /// The connection closed or failed.
    Disconnected,
}

/// Per-connection state machine for the worker side.
///
/// Owns the computation engine and at most one production loop. The
/// command handler and the loop synchronize only through the shared
/// version and the loop's cancellation token; CONFIGURE and STOP both
/// wait for the loop to fully quiesce before returning to the protocol.
pub struct WorkerRuntime<E: ComputationEngine> {
    engine: Arc<Mutex<E>>,
    version: Arc<AtomicU32>,
    configured: bool,
    production: Option<ProductionLoop>,
}

impl<E: ComputationEngine> WorkerRuntime<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            version: Arc::new(AtomicU32::new(INITIAL_VERSION)),
            configured: false,
            production: None,
        }
    }

    /// Announce readiness and serve manager commands until the manager
    /// sends DIE or the connection goes away.
    pub async fn run<S>(mut self, stream: S) -> ExitReason
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut sink, mut commands) = Framed::new(stream, CommandCodec::new()).split();

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Command>(OUTBOX_CAPACITY);

        // The production loop posts through this task, so the command
        // loop below is never blocked on the socket.
        let writer = tokio::spawn(async move {
            while let Some(command) = outbox_rx.recv().await {
                if sink.send(command).await.is_err() {
                    break;
                }
            }
        });

        let reason = if outbox_tx.send(Command::Ready).await.is_err() {
            ExitReason::Disconnected
        } else {
            self.serve(&mut commands, &outbox_tx).await
        };

        // Disconnect (from either side) stops production and releases
        // the connection resources.
        self.stop_work().await;
        writer.abort();
        reason
    }

    async fn serve<St>(&mut self, commands: &mut St, outbox: &mpsc::Sender<Command>) -> ExitReason
    where
        St: futures::Stream<Item = Result<Command, task_broker_core::ProtocolError>> + Unpin,
    {
        loop {
            let command = match commands.next().await {
                Some(Ok(command)) => command,
                Some(Err(e)) => {
                    warn!(error = %e, "protocol failure, dropping connection");
                    return ExitReason::Disconnected;
                }
                None => {
                    info!("manager closed the connection");
                    return ExitReason::Disconnected;
                }
            };

            match command {
                Command::Configure { version, blob } => self.configure(version, &blob).await,
                Command::Work => self.start_work(outbox),
                Command::Stop => self.stop_work().await,
                Command::Die => {
                    info!("terminating on manager request");
                    return ExitReason::Terminated;
                }
                other @ (Command::Ready | Command::Post { .. }) => {
                    warn!(tag = other.tag(), "manager sent a worker-only command, dropping connection");
                    return ExitReason::Disconnected;
                }
            }
        }
    }

    /// Quiesce any running production, then apply the new parameters and
    /// adopt the new version. Quiescing first guarantees no late result
    /// from the old loop can be tagged with the new version.
    async fn configure(&mut self, version: u32, blob: &[u8]) {
        self.stop_work().await;

        match self.engine.lock().await.configure(blob) {
            Ok(()) => {
                debug!(version, "engine reconfigured");
                self.version.store(version, Ordering::SeqCst);
                self.configured = true;
            }
            Err(e) => {
                // Keep the old parameters and version; the manager has
                // already moved on, so anything still produced here is
                // discarded as stale on its side.
                warn!(version, error = %e, "engine rejected configuration");
            }
        }
    }

    /// Spawn the production loop. WORK while already working is a bug in
    /// the manager; it is ignored rather than doubling production.
    fn start_work(&mut self, outbox: &mpsc::Sender<Command>) {
        if self.production.is_some() {
            warn!("WORK received while already working, ignoring");
            return;
        }
        if !self.configured {
            warn!("WORK received before any CONFIGURE, ignoring");
            return;
        }
        self.production = Some(ProductionLoop::spawn(
            self.engine.clone(),
            self.version.clone(),
            outbox.clone(),
        ));
    }

    /// Stop production and wait for the loop to fully exit. A no-op when
    /// nothing is running.
    async fn stop_work(&mut self) {
        if let Some(production) = self.production.take() {
            production.stop().await;
        }
    }
}
