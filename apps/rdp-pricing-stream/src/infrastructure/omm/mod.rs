//! OMM WebSocket Adapters
//!
//! Streaming sessions speaking the `tr_json2` JSON protocol:
//!
//! - **codec**: text frame encoding/decoding
//! - **messages**: wire shapes of login, item request and pong
//! - **reconnect**: fixed reconnect delay
//! - **session**: the per-connection task driving a `SessionMachine`

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use codec::{DecodedFrame, OmmCodec, ProtocolError};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
pub use session::{
    SessionStopped, SocketError, StreamSession, StreamSessionConfig, StreamSessionHandle,
};
