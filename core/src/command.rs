use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol_error::ProtocolError;

/// Version number a worker handle carries before its first configuration.
/// The first CONFIGURE of a connection is therefore tagged 1001.
pub const INITIAL_VERSION: u32 = 1000;

const TAG_READY: u8 = b'R';
const TAG_CONFIGURE: u8 = b'c';
const TAG_WORK: u8 = b'w';
const TAG_STOP: u8 = b's';
const TAG_POST: u8 = b'P';
const TAG_DIE: u8 = b'd';

/// Commands exchanged between the manager and its workers.
///
/// On the wire a command is one frame: a single tag byte followed by the
/// payload. CONFIGURE and POST carry a little-endian u32 version before
/// their blob; the other commands have no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// worker -> manager: connected and idle, ready for work
    Ready,
    /// manager -> worker: adopt new parameters under a new version
    Configure { version: u32, blob: Bytes },
    /// manager -> worker: start producing results under the current version
    Work,
    /// manager -> worker: halt production
    Stop,
    /// worker -> manager: one produced result
    Post { version: u32, data: Bytes },
    /// manager -> worker: terminate the worker process
    Die,
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::Ready => TAG_READY,
            Command::Configure { .. } => TAG_CONFIGURE,
            Command::Work => TAG_WORK,
            Command::Stop => TAG_STOP,
            Command::Post { .. } => TAG_POST,
            Command::Die => TAG_DIE,
        }
    }

    /// Serialize into a single frame payload.
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Configure { version, blob } => encode_versioned(TAG_CONFIGURE, *version, blob),
            Command::Post { version, data } => encode_versioned(TAG_POST, *version, data),
            other => Bytes::copy_from_slice(&[other.tag()]),
        }
    }

    /// Parse one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Command, ProtocolError> {
        let (&tag, payload) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
        match tag {
            TAG_READY => Ok(Command::Ready),
            TAG_WORK => Ok(Command::Work),
            TAG_STOP => Ok(Command::Stop),
            TAG_DIE => Ok(Command::Die),
            TAG_CONFIGURE => {
                let (version, blob) = split_versioned(tag, payload)?;
                Ok(Command::Configure { version, blob })
            }
            TAG_POST => {
                let (version, data) = split_versioned(tag, payload)?;
                Ok(Command::Post { version, data })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn encode_versioned(tag: u8, version: u32, body: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(tag);
    buf.put_u32_le(version);
    buf.extend_from_slice(body);
    buf.freeze()
}

fn split_versioned(tag: u8, payload: &[u8]) -> Result<(u32, Bytes), ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::TruncatedPayload {
            tag,
            len: payload.len(),
        });
    }
    let (head, body) = payload.split_at(4);
    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(head);
    Ok((u32::from_le_bytes(version_bytes), Bytes::copy_from_slice(body)))
}
