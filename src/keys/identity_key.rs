use crate::keys::{X25519PublicKey, X25519Secret, generate_random_seed};
use crate::{Error, encoding, fingerprint};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

/// Length of a serialized public identity key.
pub const IDENTITY_KEY_LEN: usize = 64;

/// Public identity key of a party.
///
/// Layout: the X25519 agreement key (32 bytes) followed by the Ed25519
/// verifying key (32 bytes) used to check signed pre-keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(#[serde(with = "encoding::array")] [u8; IDENTITY_KEY_LEN]);

impl IdentityKey {
    /// Raw 64-byte encoding.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_KEY_LEN] {
        &self.0
    }

    /// The X25519 half, used for key agreement.
    pub fn dh_public(&self) -> X25519PublicKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.0[..32]);
        X25519PublicKey::from(bytes)
    }

    /// The Ed25519 half, used for signature checks.
    pub fn verifying_key(&self) -> Result<VerifyingKey, Error> {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.0[32..]);
        VerifyingKey::from_bytes(&bytes).map_err(|err| Error::InvalidKey(err.to_string()))
    }

    /// Verifies `signature` over `message` with the Ed25519 half.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        let signature =
            Signature::from_slice(signature).map_err(|err| Error::Crypto(err.to_string()))?;
        self.verifying_key()?
            .verify_strict(message, &signature)
            .map_err(|err| Error::Crypto(err.to_string()))
    }

    /// 12-digit numeric fingerprint of this key.
    pub fn fingerprint(&self) -> String {
        fingerprint::digest(&self.0)
    }
}

impl TryFrom<&[u8]> for IdentityKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        encoding::to_array(bytes).map(Self).ok_or_else(|| {
            Error::InvalidKey(format!(
                "expected {IDENTITY_KEY_LEN}-byte identity key, got {}",
                bytes.len()
            ))
        })
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdentityKey").field(&self.fingerprint()).finish()
    }
}

/// Long-term identity key pair that combines signing and key agreement capabilities.
///
/// Both halves are derived from the same random seed.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKeyPair {
    /// Creates a new identity key pair from the OS RNG.
    pub fn generate() -> Result<Self, Error> {
        let mut seed = generate_random_seed()?;
        let signing_key = Box::new(SigningKey::from_bytes(&seed));
        let dh_key = X25519Secret::from(*seed);
        seed.zeroize();

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// The public identity key.
    pub fn public_key(&self) -> IdentityKey {
        let mut bytes = [0u8; IDENTITY_KEY_LEN];
        bytes[..32].copy_from_slice(self.dh_key.public_key().as_bytes());
        bytes[32..].copy_from_slice(self.signing_key.verifying_key().as_bytes());
        IdentityKey(bytes)
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> Result<SharedSecret, Error> {
        self.dh_key.dh(public_key)
    }

    /// Serializes the private key pair.
    ///
    /// The first 32 bytes are the Ed25519 secret, the last 32 the X25519 secret.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.signing_key.as_bytes());
        bytes[32..].copy_from_slice(&self.dh_key.to_bytes());
        bytes
    }
}

impl From<[u8; 64]> for IdentityKeyPair {
    fn from(mut bytes: [u8; 64]) -> Self {
        let mut signing_bytes = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&signing_bytes));
        signing_bytes.zeroize();

        let mut dh_bytes = Box::new([0u8; 32]);
        dh_bytes.copy_from_slice(&bytes[32..]);
        let dh_key = X25519Secret::from(dh_bytes);
        bytes.zeroize();

        Self {
            signing_key,
            dh_key,
        }
    }
}
