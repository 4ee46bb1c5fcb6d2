use crate::bundle::PreKeyBundle;
use crate::engine::CryptoEngine;
use crate::keys::{IdentityKey, IdentityKeyPair, generate_pre_keys, generate_registration_id, generate_signed_pre_key};
use crate::store::SignalStore;
use crate::{Envelope, Error, JobQueue, MessageType, ProtocolAddress, SessionBuilder, SessionCipher};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Id of the signed pre-key provisioned by [`Account::initialize`].
pub const DEFAULT_SIGNED_PRE_KEY_ID: u32 = 1;

/// The local party: a store, an engine, and the job queue every session
/// created from this account shares.
#[derive(Clone)]
pub struct Account {
    store: Arc<dyn SignalStore>,
    engine: Arc<dyn CryptoEngine>,
    queue: JobQueue,
}

impl Account {
    /// Fails with [`Error::Queue`] outside a Tokio runtime.
    pub fn new(store: Arc<dyn SignalStore>, engine: Arc<dyn CryptoEngine>) -> Result<Self, Error> {
        Ok(Self {
            store,
            engine,
            queue: JobQueue::new()?,
        })
    }

    pub fn store(&self) -> &Arc<dyn SignalStore> {
        &self.store
    }

    /// Provisions an identity key pair, a registration id, signed pre-key
    /// [`DEFAULT_SIGNED_PRE_KEY_ID`] and one-time pre-keys `1..=pre_key_count`.
    ///
    /// Does nothing if the store already holds an identity.
    pub async fn initialize(&self, pre_key_count: u32) -> Result<(), Error> {
        let store = Arc::clone(&self.store);

        self.queue
            .submit(async move {
                if store.get_identity_key_pair().await?.is_some() {
                    return Ok(());
                }

                let identity = IdentityKeyPair::generate()?;
                let registration_id = generate_registration_id()?;
                let signed_pre_key = generate_signed_pre_key(&identity, DEFAULT_SIGNED_PRE_KEY_ID)?;
                let pre_keys = generate_pre_keys(1, pre_key_count)?;

                store
                    .store_signed_pre_key(signed_pre_key.id(), signed_pre_key)
                    .await?;
                for pre_key in pre_keys {
                    store.store_pre_key(pre_key.id(), pre_key).await?;
                }
                store.store_local_registration_id(registration_id).await?;
                store.store_identity_key_pair(identity).await?;

                info!(registration_id, pre_key_count, "account initialized");
                Ok(())
            })
            .await
    }

    pub async fn identity_key(&self) -> Result<IdentityKey, Error> {
        self.store
            .get_identity_key_pair()
            .await?
            .map(|identity| identity.public_key())
            .ok_or_else(|| Error::Store("local identity key pair missing".to_string()))
    }

    pub async fn registration_id(&self) -> Result<u32, Error> {
        self.store
            .get_local_registration_id()
            .await?
            .ok_or_else(|| Error::Store("local registration id missing".to_string()))
    }

    /// Assembles the bundle a remote party needs to start a session with us.
    pub async fn prekey_bundle(&self, signed_pre_key_id: u32, pre_key_id: u32) -> Result<PreKeyBundle, Error> {
        let identity_key = self.identity_key().await?;
        let registration_id = self.registration_id().await?;
        let signed_pre_key = self
            .store
            .load_signed_pre_key(signed_pre_key_id)
            .await?
            .ok_or_else(|| Error::InvalidKey(format!("unknown signed pre-key {signed_pre_key_id}")))?;
        let pre_key = self
            .store
            .load_pre_key(pre_key_id)
            .await?
            .ok_or_else(|| Error::InvalidKey(format!("unknown pre-key {pre_key_id}")))?;

        Ok(PreKeyBundle::new(
            registration_id,
            &identity_key,
            &signed_pre_key,
            Some(&pre_key),
        ))
    }

    /// A handle on the session with `address`.
    pub fn session(&self, address: ProtocolAddress) -> SessionProtocol {
        SessionProtocol {
            builder: SessionBuilder::new(
                Arc::clone(&self.store),
                Arc::clone(&self.engine),
                self.queue.clone(),
                address.clone(),
            ),
            cipher: SessionCipher::new(
                Arc::clone(&self.store),
                Arc::clone(&self.engine),
                self.queue.clone(),
                address.clone(),
            ),
            store: Arc::clone(&self.store),
            queue: self.queue.clone(),
            address,
        }
    }
}

/// Everything an application does with one remote address.
#[derive(Clone)]
pub struct SessionProtocol {
    address: ProtocolAddress,
    builder: SessionBuilder,
    cipher: SessionCipher,
    store: Arc<dyn SignalStore>,
    queue: JobQueue,
}

impl SessionProtocol {
    pub fn address(&self) -> &ProtocolAddress {
        &self.address
    }

    pub async fn create_session(&self, bundle: &PreKeyBundle) -> Result<(), Error> {
        self.builder.create_session(bundle).await
    }

    pub async fn encrypt_message(&self, plaintext: &[u8]) -> Result<Envelope, Error> {
        self.cipher.encrypt_message(plaintext).await
    }

    /// Decrypts `body` according to its out-of-band type tag.
    ///
    /// An unknown tag fails before the store is touched. A missing tag means
    /// [`MessageType::Whisper`].
    pub async fn decrypt_message(&self, body: &[u8], message_type: Option<u32>) -> Result<Vec<u8>, Error> {
        let message_type = message_type
            .map(MessageType::try_from)
            .transpose()?
            .unwrap_or(MessageType::Whisper);
        self.cipher.decrypt_message(body, message_type).await
    }

    pub async fn has_session(&self) -> bool {
        self.builder.has_session().await
    }

    /// Fingerprint of the remote identity, if a session exists.
    pub async fn fingerprint(&self) -> Option<String> {
        match self.store.load_session(&self.address).await {
            Ok(record) => record.map(|record| record.fingerprint().to_string()),
            Err(err) => {
                warn!(address = %self.address, error = %err, "session lookup failed");
                None
            }
        }
    }

    /// Drops the session and forgets the pinned remote identity, so the
    /// contact may come back with new keys. Queued behind any in-flight
    /// operation.
    pub async fn reset(&self) -> Result<(), Error> {
        let store = Arc::clone(&self.store);
        let address = self.address.clone();

        self.queue
            .submit(async move {
                store.remove_session(&address).await?;
                store.remove_identity(&address).await?;
                info!(address = %address, "session reset");
                Ok(())
            })
            .await
    }

    pub async fn derive_shared_secret(
        &self,
        our_private: &[u8],
        their_public: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, Error> {
        self.builder.derive_shared_secret(our_private, their_public).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemorySignalStore, RatchetEngine};

    fn account() -> Account {
        Account::new(
            Arc::new(InMemorySignalStore::new()),
            Arc::new(RatchetEngine::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = Account::new(
            Arc::new(InMemorySignalStore::new()),
            Arc::new(RatchetEngine::default()),
        );
        assert!(matches!(result, Err(Error::Queue(_))));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let account = account();
        account.initialize(3).await.unwrap();
        let identity = account.identity_key().await.unwrap();
        let registration_id = account.registration_id().await.unwrap();

        account.initialize(3).await.unwrap();
        assert_eq!(account.identity_key().await.unwrap(), identity);
        assert_eq!(account.registration_id().await.unwrap(), registration_id);
        assert!((1..=16384).contains(&registration_id));
    }

    #[tokio::test]
    async fn test_prekey_bundle() {
        let account = account();
        account.initialize(3).await.unwrap();

        let bundle = account.prekey_bundle(DEFAULT_SIGNED_PRE_KEY_ID, 3).await.unwrap();
        let validated = bundle.validate().unwrap();
        assert_eq!(validated.pre_key_id, 3);
        assert_eq!(validated.identity_key, account.identity_key().await.unwrap());

        assert!(matches!(
            account.prekey_bundle(DEFAULT_SIGNED_PRE_KEY_ID, 4).await,
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected_first() {
        let account = account();
        let session = account.session(ProtocolAddress::new("bob", 1).unwrap());

        assert_eq!(
            session.decrypt_message(b"anything", Some(99)).await,
            Err(Error::UnknownMessageType(99))
        );
        assert!(matches!(
            session.decrypt_message(b"anything", None).await,
            Err(Error::NoSession(_))
        ));
    }

    #[tokio::test]
    async fn test_fingerprint_and_reset() {
        let alice = account();
        let bob = account();
        alice.initialize(1).await.unwrap();
        bob.initialize(1).await.unwrap();

        let session = alice.session(ProtocolAddress::new("bob", 1).unwrap());
        assert_eq!(session.fingerprint().await, None);

        session
            .create_session(&bob.prekey_bundle(DEFAULT_SIGNED_PRE_KEY_ID, 1).await.unwrap())
            .await
            .unwrap();
        let expected = bob.identity_key().await.unwrap().fingerprint();
        assert_eq!(session.fingerprint().await, Some(expected));

        session.reset().await.unwrap();
        assert!(!session.has_session().await);
        assert_eq!(session.fingerprint().await, None);
        assert!(alice.store().load_identity(session.address()).await.unwrap().is_none());
    }
}
