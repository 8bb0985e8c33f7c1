use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use task_broker_core::{DispatchRequest, DispatchResponse};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;

/// Accept dispatch clients until shutdown is requested.
pub async fn serve_dispatch(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
) {
    let mut incoming = TcpListenerStream::new(listener);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = incoming.next() => match accepted {
                Some(Ok(stream)) => {
                    tokio::spawn(serve_client(coordinator.clone(), stream));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "failed to accept dispatch client");
                }
                None => break,
            },
        }
    }
}

/// Serve one dispatch client: length-delimited JSON requests, one
/// call-and-block response per request, multiple requests per connection.
async fn serve_client<S>(coordinator: Arc<Coordinator>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dispatch client connection failed");
                return;
            }
        };

        let request: DispatchRequest = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed dispatch request, closing connection");
                return;
            }
        };

        let response = match request {
            DispatchRequest::Launch {
                configuration,
                count,
            } => {
                info!(count, "dispatch request received");
                match coordinator
                    .launch_task(Bytes::from(configuration), count)
                    .await
                {
                    Ok(results) => {
                        DispatchResponse::Results(results.iter().map(|r| r.to_vec()).collect())
                    }
                    Err(e) => DispatchResponse::Error(e.to_string()),
                }
            }
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize dispatch response");
                return;
            }
        };
        if framed.send(Bytes::from(payload)).await.is_err() {
            return;
        }
    }
}
