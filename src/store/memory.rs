use crate::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};
use crate::store::SignalStore;
use crate::{Error, ProtocolAddress, SessionRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A [`SignalStore`] that keeps everything in process memory.
///
/// Each map has its own lock; sessions and identities are keyed by the
/// address's canonical `name:deviceId` form.
#[derive(Default)]
pub struct InMemorySignalStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    pre_keys: RwLock<HashMap<u32, PreKeyRecord>>,
    signed_pre_keys: RwLock<HashMap<u32, SignedPreKeyRecord>>,
    identities: RwLock<HashMap<String, IdentityKey>>,
    identity_key_pair: RwLock<Option<IdentityKeyPair>>,
    registration_id: RwLock<Option<u32>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, Error> {
        Ok(self.sessions.read().await.get(&address.to_string()).cloned())
    }

    async fn store_session(&self, address: &ProtocolAddress, record: SessionRecord) -> Result<(), Error> {
        self.sessions.write().await.insert(address.to_string(), record);
        Ok(())
    }

    async fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error> {
        Ok(self.sessions.read().await.contains_key(&address.to_string()))
    }

    async fn remove_session(&self, address: &ProtocolAddress) -> Result<(), Error> {
        self.sessions.write().await.remove(&address.to_string());
        Ok(())
    }

    async fn remove_all_sessions(&self, name: &str) -> Result<usize, Error> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|key, _| !key_belongs_to(key, name));
        let removed = before - sessions.len();
        drop(sessions);

        self.identities
            .write()
            .await
            .retain(|key, _| !key_belongs_to(key, name));
        Ok(removed)
    }

    async fn all_sessions(&self) -> Result<Vec<SessionRecord>, Error> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, Error> {
        Ok(self.pre_keys.read().await.get(&id).cloned())
    }

    async fn store_pre_key(&self, id: u32, record: PreKeyRecord) -> Result<(), Error> {
        self.pre_keys.write().await.insert(id, record);
        Ok(())
    }

    async fn remove_pre_key(&self, id: u32) -> Result<(), Error> {
        self.pre_keys.write().await.remove(&id);
        Ok(())
    }

    async fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, Error> {
        Ok(self.signed_pre_keys.read().await.get(&id).cloned())
    }

    async fn store_signed_pre_key(&self, id: u32, record: SignedPreKeyRecord) -> Result<(), Error> {
        self.signed_pre_keys.write().await.insert(id, record);
        Ok(())
    }

    async fn remove_signed_pre_key(&self, id: u32) -> Result<(), Error> {
        self.signed_pre_keys.write().await.remove(&id);
        Ok(())
    }

    async fn get_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, Error> {
        Ok(self.identity_key_pair.read().await.clone())
    }

    async fn store_identity_key_pair(&self, identity: IdentityKeyPair) -> Result<(), Error> {
        *self.identity_key_pair.write().await = Some(identity);
        Ok(())
    }

    async fn get_local_registration_id(&self) -> Result<Option<u32>, Error> {
        Ok(*self.registration_id.read().await)
    }

    async fn store_local_registration_id(&self, registration_id: u32) -> Result<(), Error> {
        *self.registration_id.write().await = Some(registration_id);
        Ok(())
    }

    async fn load_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error> {
        Ok(self.identities.read().await.get(&address.to_string()).copied())
    }

    async fn save_identity(&self, address: &ProtocolAddress, identity: &IdentityKey) -> Result<bool, Error> {
        let previous = self
            .identities
            .write()
            .await
            .insert(address.to_string(), *identity);
        Ok(previous.is_some_and(|previous| previous != *identity))
    }

    async fn remove_identity(&self, address: &ProtocolAddress) -> Result<(), Error> {
        self.identities.write().await.remove(&address.to_string());
        Ok(())
    }
}

/// Whether a map key is the canonical form of an address belonging to `name`.
fn key_belongs_to(key: &str, name: &str) -> bool {
    ProtocolAddress::from_string(key).is_ok_and(|address| address.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionState;
    use crate::keys::IdentityKeyPair;

    fn record(name: &str, device_id: u32) -> SessionRecord {
        let address = ProtocolAddress::new(name, device_id).unwrap();
        let identity = IdentityKeyPair::generate().unwrap().public_key();
        SessionRecord::new(address, identity, [0u8; 32], SessionState::new(serde_json::json!({})), None)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = InMemorySignalStore::new();
        let record = record("alice", 1);
        let address = record.address().clone();

        assert!(store.load_session(&address).await.unwrap().is_none());
        assert!(!store.contains_session(&address).await.unwrap());

        store.store_session(&address, record.clone()).await.unwrap();
        assert!(store.contains_session(&address).await.unwrap());
        assert_eq!(store.load_session(&address).await.unwrap(), Some(record));

        store.remove_session(&address).await.unwrap();
        assert!(!store.contains_session(&address).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_all_sessions_by_name() {
        let store = InMemorySignalStore::new();
        for record in [record("alice", 1), record("alice", 2), record("bob", 1)] {
            store.store_session(&record.address().clone(), record).await.unwrap();
        }

        assert_eq!(store.remove_all_sessions("alice").await.unwrap(), 2);
        assert_eq!(store.all_sessions().await.unwrap().len(), 1);
        assert_eq!(store.remove_all_sessions("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_all_sessions_follows_storage_key() {
        let store = InMemorySignalStore::new();
        let stored_under = ProtocolAddress::new("alice", 4).unwrap();
        // The record's own address differs from the key it was stored under.
        store.store_session(&stored_under, record("mallory", 1)).await.unwrap();
        let identity = IdentityKeyPair::generate().unwrap().public_key();
        store.save_identity(&stored_under, &identity).await.unwrap();

        assert_eq!(store.remove_all_sessions("alice").await.unwrap(), 1);
        assert!(!store.contains_session(&stored_under).await.unwrap());
        assert!(store.load_identity(&stored_under).await.unwrap().is_none());
        assert_eq!(store.remove_all_sessions("mallory").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pre_keys() {
        let store = InMemorySignalStore::new();
        let pre_key = PreKeyRecord::generate(7).unwrap();
        let public = pre_key.public_key();

        store.store_pre_key(7, pre_key).await.unwrap();
        let loaded = store.load_pre_key(7).await.unwrap().unwrap();
        assert_eq!(loaded.public_key(), public);

        store.remove_pre_key(7).await.unwrap();
        assert!(store.load_pre_key(7).await.unwrap().is_none());

        let identity = IdentityKeyPair::generate().unwrap();
        let signed = SignedPreKeyRecord::generate(&identity, 1).unwrap();
        store.store_signed_pre_key(1, signed).await.unwrap();
        assert!(store.load_signed_pre_key(1).await.unwrap().is_some());
        store.remove_signed_pre_key(1).await.unwrap();
        assert!(store.load_signed_pre_key(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_identity() {
        let store = InMemorySignalStore::new();
        assert!(store.get_identity_key_pair().await.unwrap().is_none());
        assert!(store.get_local_registration_id().await.unwrap().is_none());

        let identity = IdentityKeyPair::generate().unwrap();
        let public = identity.public_key();
        store.store_identity_key_pair(identity).await.unwrap();
        store.store_local_registration_id(42).await.unwrap();

        let loaded = store.get_identity_key_pair().await.unwrap().unwrap();
        assert_eq!(loaded.public_key(), public);
        assert_eq!(store.get_local_registration_id().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_trust_on_first_use() {
        let store = InMemorySignalStore::new();
        let address = ProtocolAddress::new("carol", 3).unwrap();
        let first = IdentityKeyPair::generate().unwrap().public_key();
        let second = IdentityKeyPair::generate().unwrap().public_key();

        assert!(store.is_trusted_identity(&address, &first).await.unwrap());
        assert!(!store.save_identity(&address, &first).await.unwrap());
        assert!(store.is_trusted_identity(&address, &first).await.unwrap());
        assert!(!store.is_trusted_identity(&address, &second).await.unwrap());

        assert!(store.save_identity(&address, &second).await.unwrap());
        assert_eq!(store.load_identity(&address).await.unwrap(), Some(second));

        store.remove_identity(&address).await.unwrap();
        assert!(store.is_trusted_identity(&address, &first).await.unwrap());
    }
}
