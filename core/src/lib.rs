mod command;
pub use command::{Command, INITIAL_VERSION};

mod codec;
pub use codec::{CommandCodec, MAX_FRAME_LEN};

mod protocol_error;
pub use protocol_error::ProtocolError;

mod engine;
pub use engine::{ComputationEngine, EngineError};

mod dispatch;
pub use dispatch::{DispatchRequest, DispatchResponse};

mod client;
pub use client::{DispatchClient, DispatchError};
