//! Persistence contract for sessions and key material.

mod memory;
pub use memory::*;

use crate::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};
use crate::{Error, ProtocolAddress, SessionRecord};
use async_trait::async_trait;

/// Backing store for everything the session layer persists.
///
/// Absent entries are `Ok(None)`; `Err(Error::Store)` is reserved for I/O
/// failures or corruption. Writes for a single key must be atomic, but no
/// transactions across keys are assumed.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, Error>;

    /// Replaces any existing record for `address`.
    async fn store_session(&self, address: &ProtocolAddress, record: SessionRecord) -> Result<(), Error>;

    async fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error>;

    async fn remove_session(&self, address: &ProtocolAddress) -> Result<(), Error>;

    /// Removes the sessions for every device of `name`, returning how many were removed.
    ///
    /// Identities pinned for those devices are forgotten too, so the contact
    /// can come back with new keys.
    async fn remove_all_sessions(&self, name: &str) -> Result<usize, Error>;

    async fn all_sessions(&self) -> Result<Vec<SessionRecord>, Error>;

    async fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, Error>;

    async fn store_pre_key(&self, id: u32, record: PreKeyRecord) -> Result<(), Error>;

    async fn remove_pre_key(&self, id: u32) -> Result<(), Error>;

    async fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, Error>;

    async fn store_signed_pre_key(&self, id: u32, record: SignedPreKeyRecord) -> Result<(), Error>;

    async fn remove_signed_pre_key(&self, id: u32) -> Result<(), Error>;

    async fn get_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, Error>;

    async fn store_identity_key_pair(&self, identity: IdentityKeyPair) -> Result<(), Error>;

    async fn get_local_registration_id(&self) -> Result<Option<u32>, Error>;

    async fn store_local_registration_id(&self, registration_id: u32) -> Result<(), Error>;

    /// The identity key last seen for `address`.
    async fn load_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error>;

    /// Pins `identity` for `address`. Returns `true` if it replaced a different key.
    async fn save_identity(&self, address: &ProtocolAddress, identity: &IdentityKey) -> Result<bool, Error>;

    /// Forgets the identity pinned for `address`.
    async fn remove_identity(&self, address: &ProtocolAddress) -> Result<(), Error>;

    /// Trust on first use: unknown addresses are trusted, known ones must match.
    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, Error> {
        Ok(self
            .load_identity(address)
            .await?
            .is_none_or(|known| known == *identity))
    }
}
