use crate::{Error, encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric-key ratchet for one direction of a session.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Chain {
    #[serde(with = "encoding::array")]
    key: [u8; 32],
    index: u32,
}

impl Chain {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self { key, index: 0 }
    }

    /// Index of the next message key this chain will yield.
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    /// Advances the chain and returns a message key
    pub(crate) fn next(&mut self) -> Result<Zeroizing<[u8; 32]>, Error> {
        let chain_key = Self::derive(&self.key, 0x02)?;
        let message_key = Self::derive(&self.key, 0x01)?;

        self.key.copy_from_slice(chain_key.as_slice());
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("chain exhausted".to_string()))?;

        Ok(message_key)
    }

    fn derive(key: &[u8; 32], constant: u8) -> Result<Zeroizing<[u8; 32]>, Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|err| Error::Crypto(format!("HMAC initialization failed: {err}")))?;
        mac.update(&[constant]);

        let mut output = Zeroizing::new([0u8; 32]);
        output.copy_from_slice(&mac.finalize().into_bytes());
        Ok(output)
    }
}
