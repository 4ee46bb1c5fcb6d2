mod chain;
mod state;

pub(crate) use chain::Chain;
pub(crate) use state::{RatchetState, SkippedKey};

use crate::keys::{X25519PublicKey, X25519Secret};
use crate::proto::WhisperMessage;
use crate::{Error, SessionState, encoding};
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use prost::Message;
use serde::Deserialize;
use sha2::Sha256;
use zeroize::Zeroizing;

const NONCE_SIZE: usize = 12;
const ROOT_INFO: &[u8] = b"Parley-Ratchet-Root";
const MESSAGE_INFO: &[u8] = b"Parley-Message-Keys";

/// Double Ratchet over an X3DH shared secret.
///
/// Every operation works on an owned copy of the state and only hands back
/// a new state on success, so a failed decrypt leaves the caller's session
/// exactly as it was.
pub(crate) struct DoubleRatchet {
    state: RatchetState,
    max_skip: u32,
}

impl DoubleRatchet {
    /// Initializes a ratchet for the initiator, who can send immediately.
    pub(crate) fn initialize_for_alice(
        shared_secret: &[u8; 32],
        bob_ratchet_key: &X25519PublicKey,
        associated_data: Vec<u8>,
        max_skip: u32,
    ) -> Result<Self, Error> {
        let ratchet_secret = X25519Secret::generate()?;
        let (root_key, chain_key) =
            Self::kdf_rk(shared_secret, &ratchet_secret.dh(bob_ratchet_key)?.to_bytes())?;

        Ok(Self {
            state: RatchetState {
                associated_data,
                root_key: *root_key,
                ratchet_secret: ratchet_secret.to_bytes(),
                remote_ratchet_key: Some(bob_ratchet_key.to_bytes()),
                sending: Some(Chain::new(*chain_key)),
                receiving: None,
                previous_counter: 0,
                skipped: Vec::new(),
            },
            max_skip,
        })
    }

    /// Initializes a ratchet for the responder, whose first ratchet key is
    /// the signed pre-key. It can send once the first message arrives.
    pub(crate) fn initialize_for_bob(
        shared_secret: &[u8; 32],
        signed_pre_key: X25519Secret,
        associated_data: Vec<u8>,
        max_skip: u32,
    ) -> Self {
        Self {
            state: RatchetState {
                associated_data,
                root_key: *shared_secret,
                ratchet_secret: signed_pre_key.to_bytes(),
                remote_ratchet_key: None,
                sending: None,
                receiving: None,
                previous_counter: 0,
                skipped: Vec::new(),
            },
            max_skip,
        }
    }

    pub(crate) fn from_session_state(state: &SessionState, max_skip: u32) -> Result<Self, Error> {
        Ok(Self {
            state: RatchetState::deserialize(state.as_value())?,
            max_skip,
        })
    }

    pub(crate) fn to_session_state(&self) -> Result<SessionState, Error> {
        Ok(SessionState::new(serde_json::to_value(&self.state)?))
    }

    /// Encrypts `plaintext` as a serialized [`WhisperMessage`].
    pub(crate) fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let ratchet_key = X25519Secret::from(self.state.ratchet_secret).public_key().to_bytes();
        let previous_counter = self.state.previous_counter;
        let sending = self
            .state
            .sending
            .as_mut()
            .ok_or_else(|| Error::Encryption("session cannot send before it has received".to_string()))?;

        let counter = sending.index();
        let message_key = sending.next()?;

        let ad = self.message_ad(&ratchet_key, counter, previous_counter);
        let ciphertext = Self::encrypt_message(&message_key, plaintext, &ad)?;

        Ok(WhisperMessage {
            ratchet_key: ratchet_key.to_vec(),
            counter,
            previous_counter,
            ciphertext,
        }
        .encode_to_vec())
    }

    /// Decrypts a serialized [`WhisperMessage`].
    pub(crate) fn decrypt(&mut self, body: &[u8]) -> Result<Vec<u8>, Error> {
        let message = WhisperMessage::parse(body)?;
        let ratchet_key: [u8; 32] = encoding::to_array(&message.ratchet_key)
            .ok_or_else(|| Error::Decryption("malformed ratchet key".to_string()))?;
        let ad = self.message_ad(&ratchet_key, message.counter, message.previous_counter);

        if let Some(position) = self
            .state
            .skipped
            .iter()
            .position(|skipped| skipped.ratchet_key == ratchet_key && skipped.counter == message.counter)
        {
            let skipped = self.state.skipped.remove(position);
            return Self::decrypt_message(&skipped.message_key, &message.ciphertext, &ad);
        }

        if self.state.remote_ratchet_key != Some(ratchet_key) {
            self.skip_message_keys(message.previous_counter)?;
            self.dh_ratchet(ratchet_key)?;
        }

        let receiving_index = self.state.receiving.as_ref().map_or(0, Chain::index);
        if message.counter < receiving_index {
            return Err(Error::Decryption("duplicate or expired message".to_string()));
        }

        self.skip_message_keys(message.counter)?;
        let receiving = self
            .state
            .receiving
            .as_mut()
            .ok_or_else(|| Error::Decryption("no receiving chain".to_string()))?;
        let message_key = receiving.next()?;

        Self::decrypt_message(&message_key, &message.ciphertext, &ad)
    }

    /// Performs a Diffie-Hellman ratchet step towards `remote_ratchet_key`.
    fn dh_ratchet(&mut self, remote_ratchet_key: [u8; 32]) -> Result<(), Error> {
        let remote = X25519PublicKey::from(remote_ratchet_key);

        self.state.previous_counter = self.state.sending.as_ref().map_or(0, Chain::index);
        self.state.remote_ratchet_key = Some(remote_ratchet_key);

        let current = X25519Secret::from(self.state.ratchet_secret);
        let (root_key, chain_key) = Self::kdf_rk(&self.state.root_key, &current.dh(&remote)?.to_bytes())?;
        self.state.receiving = Some(Chain::new(*chain_key));

        let next = X25519Secret::generate()?;
        let (root_key, chain_key) = Self::kdf_rk(&root_key, &next.dh(&remote)?.to_bytes())?;
        self.state.sending = Some(Chain::new(*chain_key));
        self.state.root_key = *root_key;
        self.state.ratchet_secret = next.to_bytes();

        Ok(())
    }

    /// Stores the message keys of the current receiving chain up to `until`.
    fn skip_message_keys(&mut self, until: u32) -> Result<(), Error> {
        let (Some(receiving), Some(ratchet_key)) =
            (self.state.receiving.as_mut(), self.state.remote_ratchet_key)
        else {
            return Ok(());
        };

        if until.saturating_sub(receiving.index()) > self.max_skip {
            return Err(Error::Decryption("too many skipped messages".to_string()));
        }

        while receiving.index() < until {
            let counter = receiving.index();
            let message_key = receiving.next()?;
            self.state.skipped.push(SkippedKey {
                ratchet_key,
                counter,
                message_key: *message_key,
            });
        }

        // Oldest keys go first once the cache is full.
        let max_skip = usize::try_from(self.max_skip).unwrap_or(usize::MAX);
        if self.state.skipped.len() > max_skip {
            let excess = self.state.skipped.len() - max_skip;
            self.state.skipped.drain(..excess);
        }

        Ok(())
    }

    fn message_ad(&self, ratchet_key: &[u8; 32], counter: u32, previous_counter: u32) -> Vec<u8> {
        let mut ad = Vec::with_capacity(self.state.associated_data.len() + 40);
        ad.extend_from_slice(&self.state.associated_data);
        ad.extend_from_slice(ratchet_key);
        ad.extend_from_slice(&counter.to_be_bytes());
        ad.extend_from_slice(&previous_counter.to_be_bytes());
        ad
    }

    /// Root key KDF: returns the new root key and a chain key.
    fn kdf_rk(
        root_key: &[u8; 32],
        dh_output: &[u8; 32],
    ) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), Error> {
        let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output);

        let mut output = Zeroizing::new([0u8; 64]);
        hkdf.expand(ROOT_INFO, output.as_mut_slice())
            .map_err(|_| Error::Crypto("HKDF expansion failed for root key".to_string()))?;

        let mut new_root_key = Zeroizing::new([0u8; 32]);
        let mut chain_key = Zeroizing::new([0u8; 32]);
        new_root_key.copy_from_slice(&output[..32]);
        chain_key.copy_from_slice(&output[32..]);

        Ok((new_root_key, chain_key))
    }

    /// Expands a message key into an AES-256-GCM-SIV key and nonce.
    fn message_cipher(message_key: &[u8; 32]) -> Result<(Aes256GcmSiv, [u8; NONCE_SIZE]), Error> {
        let hkdf = Hkdf::<Sha256>::new(None, message_key);

        let mut derived_material = Zeroizing::new([0u8; 44]);
        hkdf.expand(MESSAGE_INFO, derived_material.as_mut_slice())
            .map_err(|_| Error::Crypto("HKDF expansion failed for message key".to_string()))?;

        let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(&derived_material[..32]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&derived_material[32..44]);

        Ok((Aes256GcmSiv::new(key), nonce))
    }

    fn encrypt_message(message_key: &[u8; 32], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
        let (cipher, nonce) = Self::message_cipher(message_key)?;
        cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: ad })
            .map_err(|_| Error::Encryption("message encryption failed".to_string()))
    }

    fn decrypt_message(message_key: &[u8; 32], ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
        let (cipher, nonce) = Self::message_cipher(message_key)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: ad })
            .map_err(|_| Error::Decryption("message authentication failed".to_string()))
    }
}
