/// Errors that can occur while managing sessions and dispatching messages.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// An address could not be constructed or parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Key material has the wrong shape or is empty.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A remote pre-key bundle is missing material or malformed.
    #[error("Invalid pre-key bundle: {0}")]
    InvalidBundle(String),

    /// The session store failed or violated its contract.
    #[error("Store failure: {0}")]
    Store(String),

    /// Key agreement or signature verification failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A message could not be encrypted.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// A message could not be decrypted. The stored session is left untouched.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The out-of-band message type tag is not one we know.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    /// No session exists for the address.
    #[error("No session for {0}")]
    NoSession(String),

    /// The remote identity key differs from the one pinned for the address.
    #[error("Untrusted identity for {0}")]
    UntrustedIdentity(String),

    /// A persisted session record could not be restored.
    #[error("Corrupt session record: {0}")]
    CorruptRecord(String),

    /// A queued job could not deliver its result.
    #[error("Job queue: {0}")]
    Queue(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::CorruptRecord(value.to_string())
    }
}
