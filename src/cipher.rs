use crate::builder::{process_pre_key_message, seal_pre_key_message};
use crate::engine::CryptoEngine;
use crate::store::SignalStore;
use crate::{Envelope, Error, JobQueue, MessageType, ProtocolAddress};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encrypts and decrypts messages on the session with one remote address.
///
/// Every call runs on the shared job queue, so ratchet updates for the same
/// store are applied one at a time and in order.
#[derive(Clone)]
pub struct SessionCipher {
    store: Arc<dyn SignalStore>,
    engine: Arc<dyn CryptoEngine>,
    queue: JobQueue,
    address: ProtocolAddress,
}

impl SessionCipher {
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

    /// Encrypts `plaintext` for the remote address.
    ///
    /// Until the remote party has answered, messages are sealed as
    /// [`MessageType::PreKeyBundle`] so they can bootstrap the session on the
    /// other end.
    pub async fn encrypt_message(&self, plaintext: &[u8]) -> Result<Envelope, Error> {
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let address = self.address.clone();
        let plaintext = plaintext.to_vec();

        self.queue
            .submit(async move {
                let record = store
                    .load_session(&address)
                    .await?
                    .ok_or_else(|| Error::NoSession(address.to_string()))?;

                let encrypted = engine
                    .encrypt(record.session_state(), &plaintext)
                    .await
                    .map_err(encryption_error)?;

                let (message_type, body) = match (record.pending_pre_key(), encrypted.message_type) {
                    (Some(pending), MessageType::Whisper) => (
                        MessageType::PreKeyBundle,
                        seal_pre_key_message(pending, encrypted.body),
                    ),
                    (Some(_), MessageType::PreKeyBundle) | (None, MessageType::Whisper) => {
                        (encrypted.message_type, encrypted.body)
                    }
                    (None, MessageType::PreKeyBundle) => {
                        return Err(Error::Encryption(
                            "established session produced a pre-key message".to_string(),
                        ));
                    }
                };

                store
                    .store_session(&address, record.with_session_state(encrypted.session_state))
                    .await?;
                debug!(address = %address, message_type = ?message_type, "message encrypted");

                Ok(Envelope { message_type, body })
            })
            .await
    }

    /// Decrypts `body`, dispatching on its out-of-band `message_type`.
    ///
    /// [`MessageType::Whisper`] requires an existing session. Only
    /// [`MessageType::PreKeyBundle`] may create one. A failed decrypt leaves
    /// the store untouched.
    pub async fn decrypt_message(&self, body: &[u8], message_type: MessageType) -> Result<Vec<u8>, Error> {
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let address = self.address.clone();
        let body = body.to_vec();

        self.queue
            .submit(async move {
                let result = match message_type {
                    MessageType::Whisper => {
                        decrypt_whisper(store.as_ref(), engine.as_ref(), &address, &body).await
                    }
                    MessageType::PreKeyBundle => {
                        process_pre_key_message(store.as_ref(), engine.as_ref(), &address, &body).await
                    }
                };
                result.map_err(decryption_error).inspect_err(|err| {
                    warn!(address = %address, message_type = ?message_type, error = %err, "decrypt failed");
                })
            })
            .await
    }
}

async fn decrypt_whisper(
    store: &dyn SignalStore,
    engine: &dyn CryptoEngine,
    address: &ProtocolAddress,
    body: &[u8],
) -> Result<Vec<u8>, Error> {
    let record = store
        .load_session(address)
        .await?
        .ok_or_else(|| Error::NoSession(address.to_string()))?;

    let decrypted = engine
        .decrypt(record.session_state(), MessageType::Whisper, body)
        .await?;

    if !record.is_acknowledged() {
        info!(address = %address, "session state: Pending -> Established");
    }
    let record = record.with_session_state(decrypted.session_state).acknowledged();
    store.store_session(address, record).await?;

    Ok(decrypted.plaintext)
}

fn encryption_error(err: Error) -> Error {
    match err {
        Error::Encryption(_) | Error::Store(_) | Error::NoSession(_) => err,
        other => Error::Encryption(other.to_string()),
    }
}

/// Collapses engine failures into [`Error::Decryption`]; store and session
/// lookup failures keep their own kind.
fn decryption_error(err: Error) -> Error {
    match err {
        Error::Decryption(_) | Error::Store(_) | Error::NoSession(_) | Error::UntrustedIdentity(_) => err,
        other => Error::Decryption(other.to_string()),
    }
}
