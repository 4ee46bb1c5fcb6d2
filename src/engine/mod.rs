//! Cryptographic engine: key agreement and the message ratchet.
//!
//! The session layer never looks inside [`SessionState`]; it only stores what
//! the engine hands back.

mod ratchet;
mod x3dh;

use crate::bundle::ValidatedBundle;
use crate::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord, X25519PublicKey, X25519Secret};
use crate::proto::PreKeyWhisperMessage;
use crate::{EngineConfig, Error, MessageType, SessionState};
use async_trait::async_trait;
use ratchet::DoubleRatchet;
use tracing::trace;
use x3dh::X3dh;
use zeroize::Zeroizing;

/// Result of the initiator's key agreement.
#[derive(Debug)]
pub struct InitiatedSession {
    pub session_state: SessionState,
    /// Our ephemeral base key; the responder needs it to repeat the agreement.
    pub base_key: [u8; 32],
}

/// An encrypted message and the session state to persist with it.
#[derive(Debug)]
pub struct Encrypted {
    pub message_type: MessageType,
    pub body: Vec<u8>,
    pub session_state: SessionState,
}

/// A decrypted message and the session state to persist with it.
#[derive(Debug)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    pub session_state: SessionState,
}

/// Cryptographic primitives the session layer relies on.
///
/// Implementations must not mutate anything reachable from their inputs: a
/// new state is returned on success and nothing is returned on failure.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Checks `signature` over `message` against `identity_key`.
    async fn verify_signature(
        &self,
        identity_key: &IdentityKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error>;

    /// Raw X25519 agreement between a 32-byte private and public key.
    async fn derive_shared_secret(
        &self,
        our_private: &[u8],
        their_public: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, Error>;

    /// Runs the initiator's key agreement against a verified bundle.
    async fn initiate_session(
        &self,
        our_identity: &IdentityKeyPair,
        bundle: &ValidatedBundle,
    ) -> Result<InitiatedSession, Error>;

    /// Runs the responder's key agreement for an incoming handshake.
    async fn accept_session(
        &self,
        our_identity: &IdentityKeyPair,
        signed_pre_key: &SignedPreKeyRecord,
        pre_key: Option<&PreKeyRecord>,
        their_identity: &IdentityKey,
        their_base_key: &[u8; 32],
    ) -> Result<SessionState, Error>;

    async fn encrypt(&self, state: &SessionState, plaintext: &[u8]) -> Result<Encrypted, Error>;

    async fn decrypt(
        &self,
        state: &SessionState,
        message_type: MessageType,
        body: &[u8],
    ) -> Result<Decrypted, Error>;
}

/// [`CryptoEngine`] built on X3DH and the Double Ratchet.
#[derive(Clone, Debug, Default)]
pub struct RatchetEngine {
    config: EngineConfig,
}

impl RatchetEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn associated_data(initiator: &IdentityKey, responder: &IdentityKey) -> Vec<u8> {
        let mut ad = Vec::with_capacity(initiator.as_bytes().len() + responder.as_bytes().len());
        ad.extend_from_slice(initiator.as_bytes());
        ad.extend_from_slice(responder.as_bytes());
        ad
    }
}

#[async_trait]
impl CryptoEngine for RatchetEngine {
    async fn verify_signature(
        &self,
        identity_key: &IdentityKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        identity_key.verify(message, signature)
    }

    async fn derive_shared_secret(
        &self,
        our_private: &[u8],
        their_public: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, Error> {
        let secret = X25519Secret::try_from(our_private)?;
        let public = X25519PublicKey::try_from(their_public)?;
        Ok(Zeroizing::new(secret.dh(&public)?.to_bytes()))
    }

    async fn initiate_session(
        &self,
        our_identity: &IdentityKeyPair,
        bundle: &ValidatedBundle,
    ) -> Result<InitiatedSession, Error> {
        let initiation = X3dh::new(&self.config.protocol_info).initiate(our_identity, bundle)?;
        let ad = Self::associated_data(&our_identity.public_key(), &bundle.identity_key);
        let ratchet = DoubleRatchet::initialize_for_alice(
            &initiation.shared_secret,
            &bundle.signed_pre_key,
            ad,
            self.config.max_skipped_messages,
        )?;

        Ok(InitiatedSession {
            session_state: ratchet.to_session_state()?,
            base_key: initiation.base_key.to_bytes(),
        })
    }

    async fn accept_session(
        &self,
        our_identity: &IdentityKeyPair,
        signed_pre_key: &SignedPreKeyRecord,
        pre_key: Option<&PreKeyRecord>,
        their_identity: &IdentityKey,
        their_base_key: &[u8; 32],
    ) -> Result<SessionState, Error> {
        let shared_secret = X3dh::new(&self.config.protocol_info).accept(
            our_identity,
            signed_pre_key,
            pre_key,
            their_identity,
            &X25519PublicKey::from(*their_base_key),
        )?;
        let ad = Self::associated_data(their_identity, &our_identity.public_key());
        let ratchet = DoubleRatchet::initialize_for_bob(
            &shared_secret,
            signed_pre_key.key_pair(),
            ad,
            self.config.max_skipped_messages,
        );

        ratchet.to_session_state()
    }

    async fn encrypt(&self, state: &SessionState, plaintext: &[u8]) -> Result<Encrypted, Error> {
        let mut ratchet = DoubleRatchet::from_session_state(state, self.config.max_skipped_messages)
            .map_err(|err| Error::Encryption(err.to_string()))?;
        let body = ratchet.encrypt(plaintext)?;

        Ok(Encrypted {
            message_type: MessageType::Whisper,
            body,
            session_state: ratchet.to_session_state()?,
        })
    }

    async fn decrypt(
        &self,
        state: &SessionState,
        message_type: MessageType,
        body: &[u8],
    ) -> Result<Decrypted, Error> {
        let outer;
        let body = match message_type {
            MessageType::Whisper => body,
            MessageType::PreKeyBundle => {
                outer = PreKeyWhisperMessage::parse(body)?;
                outer.message.as_slice()
            }
        };

        let mut ratchet = DoubleRatchet::from_session_state(state, self.config.max_skipped_messages)
            .map_err(|err| Error::Decryption(err.to_string()))?;
        let plaintext = ratchet.decrypt(body)?;
        trace!(len = plaintext.len(), "message decrypted");

        Ok(Decrypted {
            plaintext,
            session_state: ratchet.to_session_state()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PreKeyBundle;

    struct Party {
        identity: IdentityKeyPair,
        signed_pre_key: SignedPreKeyRecord,
        pre_key: PreKeyRecord,
    }

    fn party() -> Party {
        let identity = IdentityKeyPair::generate().unwrap();
        Party {
            signed_pre_key: SignedPreKeyRecord::generate(&identity, 1).unwrap(),
            pre_key: PreKeyRecord::generate(2).unwrap(),
            identity,
        }
    }

    async fn established(engine: &RatchetEngine) -> (SessionState, SessionState) {
        let alice = party();
        let bob = party();
        let bundle = PreKeyBundle::new(1, &bob.identity.public_key(), &bob.signed_pre_key, Some(&bob.pre_key))
            .validate()
            .unwrap();

        let initiated = engine.initiate_session(&alice.identity, &bundle).await.unwrap();
        let bob_state = engine
            .accept_session(
                &bob.identity,
                &bob.signed_pre_key,
                Some(&bob.pre_key),
                &alice.identity.public_key(),
                &initiated.base_key,
            )
            .await
            .unwrap();

        (initiated.session_state, bob_state)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let engine = RatchetEngine::default();
        let (alice, bob) = established(&engine).await;

        let encrypted = engine.encrypt(&alice, b"hello").await.unwrap();
        assert_eq!(encrypted.message_type, MessageType::Whisper);

        let decrypted = engine
            .decrypt(&bob, MessageType::Whisper, &encrypted.body)
            .await
            .unwrap();
        assert_eq!(decrypted.plaintext, b"hello");

        let reply = engine.encrypt(&decrypted.session_state, b"hi").await.unwrap();
        let decrypted = engine
            .decrypt(&encrypted.session_state, MessageType::Whisper, &reply.body)
            .await
            .unwrap();
        assert_eq!(decrypted.plaintext, b"hi");
    }

    #[tokio::test]
    async fn test_failed_decrypt_leaves_state() {
        let engine = RatchetEngine::default();
        let (alice, bob) = established(&engine).await;
        let encrypted = engine.encrypt(&alice, b"hello").await.unwrap();

        let mut corrupted = encrypted.body.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        let before = bob.clone();
        assert!(engine.decrypt(&bob, MessageType::Whisper, &corrupted).await.is_err());
        assert_eq!(bob, before);

        let decrypted = engine
            .decrypt(&bob, MessageType::Whisper, &encrypted.body)
            .await
            .unwrap();
        assert_eq!(decrypted.plaintext, b"hello");
    }

    #[tokio::test]
    async fn test_derive_shared_secret() {
        let engine = RatchetEngine::default();
        let a = X25519Secret::generate().unwrap();
        let b = X25519Secret::generate().unwrap();

        let ab = engine
            .derive_shared_secret(&a.to_bytes(), b.public_key().as_bytes())
            .await
            .unwrap();
        let ba = engine
            .derive_shared_secret(&b.to_bytes(), a.public_key().as_bytes())
            .await
            .unwrap();
        assert_eq!(*ab, *ba);

        assert!(matches!(
            engine.derive_shared_secret(&[1u8; 31], b.public_key().as_bytes()).await,
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_signature() {
        let engine = RatchetEngine::default();
        let bob = party();
        let public = bob.identity.public_key();
        let message = bob.signed_pre_key.public_key().to_bytes();

        assert!(
            engine
                .verify_signature(&public, &message, &bob.signed_pre_key.signature())
                .await
                .is_ok()
        );
        assert!(matches!(
            engine.verify_signature(&public, &message, &[0u8; 64]).await,
            Err(Error::Crypto(_))
        ));
    }
}
