use crate::{Error, encoding};
use serde::{Deserialize, Serialize};

/// Out-of-band tag telling the receiver which decrypt path a body needs.
///
/// The tag is never inferred from the body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum MessageType {
    /// Steady-state ratchet message on an established session.
    Whisper = 1,
    /// Handshake message that carries the material to establish a session.
    PreKeyBundle = 3,
}

impl From<MessageType> for u32 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Whisper => 1,
            MessageType::PreKeyBundle => 3,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Whisper),
            3 => Ok(Self::PreKeyBundle),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// A ciphertext together with its message type, as handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// How the receiver must decrypt `body`.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Serialized ciphertext.
    #[serde(with = "encoding::bytes")]
    pub body: Vec<u8>,
}
