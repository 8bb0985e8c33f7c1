use thiserror::Error;

/// Errors raised while framing or interpreting worker-protocol traffic.
///
/// Every variant is fatal for the connection that produced it: the
/// connection is torn down, not retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o failure on framed stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("received an empty frame")]
    EmptyFrame,

    #[error("unknown command tag {0:#04x}")]
    UnknownTag(u8),

    #[error("command {tag:#04x} payload truncated at {len} bytes")]
    TruncatedPayload { tag: u8, len: usize },
}
