use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use task_broker_core::{Command, CommandCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{WorkerHandle, WorkerRegistry};

const OUTBOX_CAPACITY: usize = 32;

/// Accept worker connections until shutdown is requested, spawning one
/// driver task per connection.
pub async fn serve_workers(
    listener: TcpListener,
    registry: WorkerRegistry,
    shutdown: CancellationToken,
) {
    let mut incoming = TcpListenerStream::new(listener);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = incoming.next() => match accepted {
                Some(Ok(stream)) => {
                    tokio::spawn(serve_worker(registry.clone(), stream));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "failed to accept worker connection");
                }
                None => break,
            },
        }
    }
}

/// Drive one worker connection until it disconnects or violates the
/// protocol. The worker is registered when its READY arrives and
/// unregistered on the way out.
pub async fn serve_worker<S>(registry: WorkerRegistry, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let id = registry.allocate_id();
    let (mut sink, mut messages) = Framed::new(stream, CommandCodec::new()).split();

    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Command>(OUTBOX_CAPACITY);
    let handle = Arc::new(WorkerHandle::new(id, outbox_tx));

    // Writes happen on their own task so a slow worker never blocks the
    // read loop or any other connection.
    let writer = tokio::spawn(async move {
        while let Some(command) = outbox_rx.recv().await {
            if let Err(e) = sink.send(command).await {
                debug!(worker = %id, error = %e, "write side closed");
                break;
            }
        }
    });

    while let Some(message) = messages.next().await {
        match message {
            Ok(Command::Ready) => {
                info!(worker = %id, "worker ready");
                registry.register(handle.clone());
            }
            Ok(Command::Post { version, data }) => {
                handle.deliver(version, data);
            }
            Ok(other) => {
                warn!(worker = %id, tag = other.tag(), "worker sent a manager-only command, closing connection");
                break;
            }
            Err(e) => {
                warn!(worker = %id, error = %e, "protocol failure, closing connection");
                break;
            }
        }
    }

    info!(worker = %id, "worker disconnected");
    registry.unregister(id);
    writer.abort();
}
