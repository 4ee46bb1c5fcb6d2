//! Local key material: identity keys, pre-keys, and the helpers that mint them.

mod identity_key;
pub use identity_key::*;

mod pre_key;
pub use pre_key::*;

mod x25519;
pub use x25519::*;

use crate::Error;
use rand::TryRngCore;
use rand::rngs::OsRng;

/// Generates a cryptographically secure random 32-byte seed.
pub(crate) fn generate_random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(seed)
}

/// Generates a registration id in `1..=16384`.
pub fn generate_registration_id() -> Result<u32, Error> {
    let value = OsRng.try_next_u32().map_err(|_| Error::Random)?;
    Ok((value & 0x3fff) + 1)
}

/// Generates `count` one-time pre-keys with consecutive ids starting at `start`.
pub fn generate_pre_keys(start: u32, count: u32) -> Result<Vec<PreKeyRecord>, Error> {
    (0..count)
        .map(|offset| PreKeyRecord::generate(start.wrapping_add(offset)))
        .collect()
}

/// Generates a signed pre-key whose public half is signed by `identity`.
pub fn generate_signed_pre_key(identity: &IdentityKeyPair, id: u32) -> Result<SignedPreKeyRecord, Error> {
    SignedPreKeyRecord::generate(identity, id)
}
