use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::command::Command;
use crate::protocol_error::ProtocolError;

/// Upper bound on a single frame, command tag and payload included.
/// A peer announcing anything larger is treated as a protocol failure.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length-delimited transport for [`Command`] frames.
///
/// Frames are a 4-byte length prefix followed by the command bytes, so
/// payloads containing arbitrary bytes never break message boundaries.
pub struct CommandCodec {
    inner: LengthDelimitedCodec,
}

impl CommandCodec {
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        Self { inner }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(Command::decode(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = ProtocolError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.inner
            .encode(command.encode(), dst)
            .map_err(ProtocolError::from)
    }
}
