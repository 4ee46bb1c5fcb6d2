use crate::Error;
use crate::keys::{IdentityKeyPair, X25519PublicKey, X25519Secret};
use crate::record::now_millis;
use ed25519_dalek::Signature;
use x25519_dalek::SharedSecret;

/// A one-time pre-key. Consumed by at most one incoming session.
#[derive(Clone)]
pub struct PreKeyRecord {
    id: u32,
    key: X25519Secret,
}

impl PreKeyRecord {
    /// Generates a fresh pre-key with the given id.
    pub fn generate(id: u32) -> Result<Self, Error> {
        Ok(Self {
            id,
            key: X25519Secret::generate()?,
        })
    }

    /// Builds a record from existing key material.
    pub fn new(id: u32, key: X25519Secret) -> Self {
        Self { id, key }
    }

    /// The key id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The public half.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key.public_key()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> Result<SharedSecret, Error> {
        self.key.dh(public_key)
    }
}

/// A medium-term pre-key signed by the identity key.
#[derive(Clone)]
pub struct SignedPreKeyRecord {
    id: u32,
    key: X25519Secret,
    signature: Signature,
    timestamp: u64,
}

impl SignedPreKeyRecord {
    /// Generates a fresh signed pre-key and signs its public half with `identity`.
    pub fn generate(identity: &IdentityKeyPair, id: u32) -> Result<Self, Error> {
        let key = X25519Secret::generate()?;
        let signature = identity.sign(key.public_key().as_bytes());
        let timestamp = now_millis();

        Ok(Self {
            id,
            key,
            signature,
            timestamp,
        })
    }

    /// The key id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The public half.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key.public_key()
    }

    /// Signature over the public half, 64 bytes.
    pub fn signature(&self) -> [u8; 64] {
        self.signature.to_bytes()
    }

    /// Creation time in milliseconds since the epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub(crate) fn key_pair(&self) -> X25519Secret {
        self.key.clone()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> Result<SharedSecret, Error> {
        self.key.dh(public_key)
    }
}
