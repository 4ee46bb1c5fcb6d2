//! Wire formats for message bodies.

use crate::Error;
use prost::Message;

/// A double ratchet message: the sender's current ratchet key, the message
/// counters, and the AEAD ciphertext.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct WhisperMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub(crate) counter: u32,
    #[prost(uint32, tag = "3")]
    pub(crate) previous_counter: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) ciphertext: Vec<u8>,
}

/// Handshake wrapper sent until the responder acknowledges the session.
///
/// Carries everything the responder needs to run its half of the key
/// agreement, plus the first ratchet message.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct PreKeyWhisperMessage {
    #[prost(uint32, tag = "1")]
    pub(crate) registration_id: u32,
    #[prost(uint32, optional, tag = "2")]
    pub(crate) pre_key_id: Option<u32>,
    #[prost(uint32, tag = "3")]
    pub(crate) signed_pre_key_id: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub(crate) identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub(crate) message: Vec<u8>,
}

impl WhisperMessage {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(bytes).map_err(|err| Error::Decryption(format!("malformed message: {err}")))
    }
}

impl PreKeyWhisperMessage {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(bytes)
            .map_err(|err| Error::Decryption(format!("malformed pre-key message: {err}")))
    }
}
