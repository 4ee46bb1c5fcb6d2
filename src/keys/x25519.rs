use crate::Error;
use crate::keys::generate_random_seed;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Public half of an X25519 key pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    /// Raw 32-byte encoding.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Raw 32-byte encoding, by value.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl TryFrom<&[u8]> for X25519PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("expected 32-byte key, got {}", bytes.len())))?;
        Ok(bytes.into())
    }
}

/// Private X25519 key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X25519Secret(Box<StaticSecret>);

impl X25519Secret {
    /// Generates a fresh secret from the OS RNG.
    pub fn generate() -> Result<Self, Error> {
        Ok(Self::from(generate_random_seed()?))
    }

    /// Diffie-Hellman with `public_key`, rejecting low-order points.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> Result<SharedSecret, Error> {
        let shared = self.0.diffie_hellman(&public_key.0);
        if !shared.was_contributory() {
            return Err(Error::Crypto("non-contributory Diffie-Hellman output".to_string()));
        }
        Ok(shared)
    }

    /// Public half of this secret.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&*self.0))
    }

    pub(crate) fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for X25519Secret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(Box::new(StaticSecret::from(bytes)))
    }
}

impl From<Box<[u8; 32]>> for X25519Secret {
    fn from(mut bytes: Box<[u8; 32]>) -> Self {
        let secret = StaticSecret::from(*bytes);
        bytes.zeroize();
        Self(Box::new(secret))
    }
}

impl TryFrom<&[u8]> for X25519Secret {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let mut bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("expected 32-byte private key, got {}", bytes.len()))
        })?;
        let secret = Self::from(bytes);
        bytes.zeroize();
        Ok(secret)
    }
}
