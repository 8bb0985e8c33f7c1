use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::dispatch::{DispatchRequest, DispatchResponse};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("i/o failure talking to the dispatch front end: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed dispatch payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("front end closed the connection mid-request")]
    ConnectionClosed,

    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// Client for the manager's dispatch front end.
///
/// One request is in flight at a time per connection; `launch_task`
/// blocks until the manager has collected the full result set.
pub struct DispatchClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl DispatchClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, DispatchError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        })
    }

    /// Run one broadcast-and-collect cycle and return the results in
    /// arrival order.
    pub async fn launch_task(
        &mut self,
        configuration: &[u8],
        count: usize,
    ) -> Result<Vec<Vec<u8>>, DispatchError> {
        let request = DispatchRequest::Launch {
            configuration: configuration.to_vec(),
            count,
        };
        self.framed
            .send(Bytes::from(serde_json::to_vec(&request)?))
            .await?;

        let frame = self
            .framed
            .next()
            .await
            .ok_or(DispatchError::ConnectionClosed)??;

        match serde_json::from_slice(&frame)? {
            DispatchResponse::Results(results) => Ok(results),
            DispatchResponse::Error(reason) => Err(DispatchError::Rejected(reason)),
        }
    }
}
