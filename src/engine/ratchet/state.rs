use crate::encoding;
use crate::engine::ratchet::Chain;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A message key kept for a message that has not arrived yet.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SkippedKey {
    #[serde(with = "encoding::array")]
    pub(crate) ratchet_key: [u8; 32],
    pub(crate) counter: u32,
    #[serde(with = "encoding::array")]
    pub(crate) message_key: [u8; 32],
}

/// Serializable double ratchet state, stored inside a session record.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RatchetState {
    /// Initiator identity key followed by responder identity key.
    #[serde(with = "encoding::bytes")]
    pub(crate) associated_data: Vec<u8>,
    #[serde(with = "encoding::array")]
    pub(crate) root_key: [u8; 32],
    #[serde(with = "encoding::array")]
    pub(crate) ratchet_secret: [u8; 32],
    #[serde(with = "encoding::option_array")]
    pub(crate) remote_ratchet_key: Option<[u8; 32]>,
    pub(crate) sending: Option<Chain>,
    pub(crate) receiving: Option<Chain>,
    pub(crate) previous_counter: u32,
    pub(crate) skipped: Vec<SkippedKey>,
}
