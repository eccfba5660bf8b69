//! OMM JSON Codec
//!
//! Encodes outbound session messages and decodes inbound frames.
//!
//! Servers send a JSON array of message objects per frame. A bare object is
//! accepted as a one-message frame. A frame that is neither is a
//! [`ProtocolError`] and is dropped whole. Inside a valid frame each message
//! is decoded on its own, so one bad message never hides its neighbours.

use serde::Deserialize as _;

use crate::domain::session::{InboundMessage, MessageKind, Outbound};

use super::messages::{InboundEnvelope, ItemRequestMessage, LoginMessage, PongMessage};

/// Malformed inbound frame (or unencodable outbound message).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON with the wrong shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Messages of one frame, in order, and the ones that failed to decode.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Decoded messages.
    pub messages: Vec<InboundMessage>,
    /// One error per dropped message.
    pub rejected: Vec<ProtocolError>,
}

/// JSON codec for the OMM streaming protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct OmmCodec;

impl OmmCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &Outbound) -> Result<String, ProtocolError> {
        let json = match message {
            Outbound::Login(login) => serde_json::to_string(&LoginMessage::from(login))?,
            Outbound::Item(item) => serde_json::to_string(&ItemRequestMessage::from(item))?,
            Outbound::Pong => serde_json::to_string(&PongMessage::default())?,
        };
        Ok(json)
    }

    /// Decode a text frame into its messages, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or not an array or object.
    /// Messages without a string `Type` are reported in
    /// [`DecodedFrame::rejected`] instead.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let values = match value {
            serde_json::Value::Array(values) => values,
            object @ serde_json::Value::Object(_) => vec![object],
            other => {
                return Err(ProtocolError::InvalidFormat(format!(
                    "expected JSON array or object, got {other}"
                )));
            }
        };

        let mut frame = DecodedFrame::default();
        for value in values {
            match Self::decode_message(value) {
                Ok(message) => frame.messages.push(message),
                Err(error) => frame.rejected.push(error),
            }
        }
        Ok(frame)
    }

    fn decode_message(payload: serde_json::Value) -> Result<InboundMessage, ProtocolError> {
        if !payload.is_object() {
            return Err(ProtocolError::InvalidFormat(format!(
                "expected message object, got {payload}"
            )));
        }
        let envelope = InboundEnvelope::deserialize(&payload)?;

        Ok(InboundMessage {
            kind: MessageKind::parse(&envelope.kind),
            id: envelope.id,
            domain: envelope.domain,
            payload,
        })
    }
}
