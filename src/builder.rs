use crate::bundle::{PreKeyBundle, ValidatedBundle};
use crate::engine::CryptoEngine;
use crate::keys::IdentityKey;
use crate::proto::PreKeyWhisperMessage;
use crate::record::PendingPreKey;
use crate::store::SignalStore;
use crate::{Error, JobQueue, MessageType, ProtocolAddress, SessionRecord, encoding};
use prost::Message;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Establishes sessions with one remote address.
///
/// A session moves `NoSession -> Pending` when we initiate from a bundle and
/// `Pending -> Established` once the remote party answers. Failed attempts
/// never leave a record behind.
#[derive(Clone)]
pub struct SessionBuilder {
    store: Arc<dyn SignalStore>,
    engine: Arc<dyn CryptoEngine>,
    queue: JobQueue,
    address: ProtocolAddress,
}

impl SessionBuilder {
    pub fn new(
        store: Arc<dyn SignalStore>,
        engine: Arc<dyn CryptoEngine>,
        queue: JobQueue,
        address: ProtocolAddress,
    ) -> Self {
        Self {
            store,
            engine,
            queue,
            address,
        }
    }

    pub fn address(&self) -> &ProtocolAddress {
        &self.address
    }

    /// Initiates a session from the remote party's published bundle.
    ///
    /// The bundle shape is checked before anything is queued; the signature,
    /// identity trust and key agreement run on the queue. Any existing
    /// session for the address is superseded.
    pub async fn create_session(&self, bundle: &PreKeyBundle) -> Result<(), Error> {
        let bundle = bundle.validate()?;

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let address = self.address.clone();

        self.queue
            .submit(async move {
                let result = initiate(store.as_ref(), engine.as_ref(), &address, &bundle).await;
                match &result {
                    Ok(()) => info!(address = %address, "session state: NoSession -> Pending"),
                    Err(err) => warn!(address = %address, error = %err, "session state: NoSession -> Failed"),
                }
                result
            })
            .await
    }

    /// Whether a session exists. Store failures read as `false`.
    pub async fn has_session(&self) -> bool {
        self.store
            .contains_session(&self.address)
            .await
            .unwrap_or_else(|err| {
                warn!(address = %self.address, error = %err, "session lookup failed");
                false
            })
    }

    /// Raw X25519 agreement, delegated to the engine.
    pub async fn derive_shared_secret(
        &self,
        our_private: &[u8],
        their_public: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, Error> {
        self.engine.derive_shared_secret(our_private, their_public).await
    }
}

async fn initiate(
    store: &dyn SignalStore,
    engine: &dyn CryptoEngine,
    address: &ProtocolAddress,
    bundle: &ValidatedBundle,
) -> Result<(), Error> {
    engine
        .verify_signature(
            &bundle.identity_key,
            bundle.signed_pre_key.as_bytes(),
            &bundle.signature,
        )
        .await
        .map_err(|err| Error::Crypto(format!("signed pre-key signature rejected: {err}")))?;

    if !store.is_trusted_identity(address, &bundle.identity_key).await? {
        return Err(Error::UntrustedIdentity(address.to_string()));
    }

    let our_identity = store
        .get_identity_key_pair()
        .await?
        .ok_or_else(|| Error::Store("local identity key pair missing".to_string()))?;
    let registration_id = store
        .get_local_registration_id()
        .await?
        .ok_or_else(|| Error::Store("local registration id missing".to_string()))?;

    let initiated = engine.initiate_session(&our_identity, bundle).await?;
    let pending = PendingPreKey {
        registration_id,
        identity_key: our_identity.public_key(),
        signed_pre_key_id: bundle.signed_pre_key_id,
        pre_key_id: Some(bundle.pre_key_id),
        base_key: initiated.base_key,
    };
    let record = SessionRecord::new(
        address.clone(),
        bundle.identity_key,
        initiated.base_key,
        initiated.session_state,
        Some(pending),
    );

    if store.contains_session(address).await? {
        debug!(address = %address, "superseding existing session");
    }
    // The session is written last: a failed write before it leaves no record.
    store.save_identity(address, &bundle.identity_key).await?;
    store.store_session(address, record).await?;

    Ok(())
}

/// Wraps an outgoing ratchet message with the handshake the responder needs.
pub(crate) fn seal_pre_key_message(pending: &PendingPreKey, message: Vec<u8>) -> Vec<u8> {
    PreKeyWhisperMessage {
        registration_id: pending.registration_id,
        pre_key_id: pending.pre_key_id,
        signed_pre_key_id: pending.signed_pre_key_id,
        base_key: pending.base_key.to_vec(),
        identity_key: pending.identity_key.as_bytes().to_vec(),
        message,
    }
    .encode_to_vec()
}

/// Responder side of the handshake: decrypts an incoming pre-key message,
/// creating the session if this is the first message under its base key.
///
/// Nothing is written unless decryption succeeds. A one-time pre-key is
/// removed only when a new session was built from it, and before the
/// session is stored, so a failed write leaves the message decryptable on
/// retry instead of half-committed.
pub(crate) async fn process_pre_key_message(
    store: &dyn SignalStore,
    engine: &dyn CryptoEngine,
    address: &ProtocolAddress,
    body: &[u8],
) -> Result<Vec<u8>, Error> {
    let message = PreKeyWhisperMessage::parse(body)?;
    let base_key: [u8; 32] = encoding::to_array(&message.base_key)
        .ok_or_else(|| Error::Decryption("malformed base key".to_string()))?;
    let their_identity = IdentityKey::try_from(message.identity_key.as_slice())
        .map_err(|err| Error::Decryption(err.to_string()))?;

    if !store.is_trusted_identity(address, &their_identity).await? {
        return Err(Error::UntrustedIdentity(address.to_string()));
    }

    let existing = store
        .load_session(address)
        .await?
        .filter(|record| record.our_base_key() == &base_key && record.identity_key() == &their_identity);

    let (state, consumed_pre_key) = match &existing {
        Some(record) => (record.session_state().clone(), None),
        None => {
            debug!(
                address = %address,
                registration_id = message.registration_id,
                signed_pre_key_id = message.signed_pre_key_id,
                "accepting new session"
            );
            let our_identity = store
                .get_identity_key_pair()
                .await?
                .ok_or_else(|| Error::Store("local identity key pair missing".to_string()))?;
            let signed_pre_key = store
                .load_signed_pre_key(message.signed_pre_key_id)
                .await?
                .ok_or_else(|| {
                    Error::Decryption(format!("unknown signed pre-key {}", message.signed_pre_key_id))
                })?;
            let pre_key = match message.pre_key_id {
                Some(id) => Some(
                    store
                        .load_pre_key(id)
                        .await?
                        .ok_or_else(|| Error::Decryption(format!("unknown pre-key {id}")))?,
                ),
                None => None,
            };

            let state = engine
                .accept_session(
                    &our_identity,
                    &signed_pre_key,
                    pre_key.as_ref(),
                    &their_identity,
                    &base_key,
                )
                .await?;
            (state, message.pre_key_id)
        }
    };

    let decrypted = engine.decrypt(&state, MessageType::PreKeyBundle, body).await?;

    let is_new = existing.is_none();
    let record = match existing {
        Some(record) => record.with_session_state(decrypted.session_state),
        None => SessionRecord::new(
            address.clone(),
            their_identity,
            base_key,
            decrypted.session_state,
            None,
        ),
    };
    store.save_identity(address, &their_identity).await?;
    if let Some(id) = consumed_pre_key {
        store.remove_pre_key(id).await?;
        debug!(address = %address, pre_key_id = id, "one-time pre-key consumed");
    }
    store.store_session(address, record).await?;
    if is_new {
        info!(address = %address, "session state: NoSession -> Established");
    }

    Ok(decrypted.plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};
    use crate::{InMemorySignalStore, RatchetEngine};

    async fn local_store() -> Arc<InMemorySignalStore> {
        let store = Arc::new(InMemorySignalStore::new());
        store
            .store_identity_key_pair(IdentityKeyPair::generate().unwrap())
            .await
            .unwrap();
        store.store_local_registration_id(77).await.unwrap();
        store
    }

    fn remote_bundle() -> PreKeyBundle {
        let identity = IdentityKeyPair::generate().unwrap();
        let signed = SignedPreKeyRecord::generate(&identity, 1).unwrap();
        let pre_key = PreKeyRecord::generate(2).unwrap();
        PreKeyBundle::new(1234, &identity.public_key(), &signed, Some(&pre_key))
    }

    fn builder(store: Arc<InMemorySignalStore>) -> SessionBuilder {
        SessionBuilder::new(
            store,
            Arc::new(RatchetEngine::default()),
            JobQueue::new().unwrap(),
            ProtocolAddress::new("bob", 1).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_session_records_pending_handshake() {
        let store = local_store().await;
        let builder = builder(Arc::clone(&store));
        let bundle = remote_bundle();

        assert!(!builder.has_session().await);
        builder.create_session(&bundle).await.unwrap();
        assert!(builder.has_session().await);

        let record = store.load_session(builder.address()).await.unwrap().unwrap();
        assert_eq!(record.created_at(), record.updated_at());
        assert_eq!(record.identity_key().as_bytes().as_slice(), bundle.identity_key.as_slice());

        let pending = record.pending_pre_key().unwrap();
        assert_eq!(pending.registration_id, 77);
        assert_eq!(pending.signed_pre_key_id, 1);
        assert_eq!(pending.pre_key_id, Some(2));
        assert_eq!(&pending.base_key, record.our_base_key());
    }

    #[tokio::test]
    async fn test_bad_signature_stores_nothing() {
        let store = local_store().await;
        let builder = builder(Arc::clone(&store));
        let mut bundle = remote_bundle();
        bundle.signed_pre_key.signature[0] ^= 0x01;

        assert!(matches!(builder.create_session(&bundle).await, Err(Error::Crypto(_))));
        assert!(!builder.has_session().await);
    }

    #[tokio::test]
    async fn test_malformed_bundle_rejected_before_queueing() {
        let store = local_store().await;
        let builder = builder(store);
        let mut bundle = remote_bundle();
        bundle.pre_key = None;

        assert!(matches!(builder.create_session(&bundle).await, Err(Error::InvalidBundle(_))));
        assert!(!builder.has_session().await);
    }

    #[tokio::test]
    async fn test_missing_local_identity() {
        let builder = builder(Arc::new(InMemorySignalStore::new()));
        assert!(matches!(builder.create_session(&remote_bundle()).await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_changed_identity_untrusted() {
        let store = local_store().await;
        let builder = builder(Arc::clone(&store));

        builder.create_session(&remote_bundle()).await.unwrap();
        assert!(matches!(
            builder.create_session(&remote_bundle()).await,
            Err(Error::UntrustedIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_same_identity_supersedes_session() {
        let store = local_store().await;
        let builder = builder(Arc::clone(&store));
        let bundle = remote_bundle();

        builder.create_session(&bundle).await.unwrap();
        let first = store.load_session(builder.address()).await.unwrap().unwrap();
        builder.create_session(&bundle).await.unwrap();
        let second = store.load_session(builder.address()).await.unwrap().unwrap();

        assert_ne!(first.our_base_key(), second.our_base_key());
        assert_eq!(store.all_sessions().await.unwrap().len(), 1);
    }

    #[test]
    fn test_sealed_message_carries_handshake() {
        let identity = IdentityKeyPair::generate().unwrap().public_key();
        let pending = PendingPreKey {
            registration_id: 5,
            identity_key: identity,
            signed_pre_key_id: 1,
            pre_key_id: Some(9),
            base_key: [4u8; 32],
        };

        let sealed = seal_pre_key_message(&pending, vec![1, 2, 3]);
        let parsed = PreKeyWhisperMessage::parse(&sealed).unwrap();
        assert_eq!(parsed.registration_id, 5);
        assert_eq!(parsed.pre_key_id, Some(9));
        assert_eq!(parsed.base_key, vec![4u8; 32]);
        assert_eq!(parsed.identity_key, identity.as_bytes().to_vec());
        assert_eq!(parsed.message, vec![1, 2, 3]);
    }
}
