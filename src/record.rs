use crate::keys::IdentityKey;
use crate::{Error, ProtocolAddress, encoding, fingerprint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Engine-owned session state: ratchet keys, chain indices and skipped-message keys.
///
/// The session layer treats this as an opaque JSON value and only ever
/// replaces it wholesale with what the engine hands back.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(Value);

impl SessionState {
    /// Wraps an engine-produced JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionState(..)")
    }
}

/// Handshake material the initiator repeats on every message until the
/// responder answers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPreKey {
    /// Our registration id.
    pub registration_id: u32,
    /// Our identity key.
    pub identity_key: IdentityKey,
    /// The responder's signed pre-key the agreement used.
    pub signed_pre_key_id: u32,
    /// The responder's one-time pre-key the agreement used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key_id: Option<u32>,
    /// Our base key for the agreement.
    #[serde(with = "encoding::array")]
    pub base_key: [u8; 32],
}

/// Snapshot of one session with a remote address.
///
/// Records are values: every state transition produces a new record and the
/// store swaps it in, so readers never observe a half-updated ratchet.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    address: ProtocolAddress,
    identity_key: IdentityKey,
    our_base_key: [u8; 32],
    session_state: SessionState,
    fingerprint: String,
    created_at: u64,
    updated_at: u64,
    pending_pre_key: Option<PendingPreKey>,
}

impl SessionRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        address: ProtocolAddress,
        identity_key: IdentityKey,
        our_base_key: [u8; 32],
        session_state: SessionState,
        pending_pre_key: Option<PendingPreKey>,
    ) -> Self {
        let now = now_millis();
        Self {
            address,
            fingerprint: identity_key.fingerprint(),
            identity_key,
            our_base_key,
            session_state,
            created_at: now,
            updated_at: now,
            pending_pre_key,
        }
    }

    pub fn address(&self) -> &ProtocolAddress {
        &self.address
    }

    /// The remote party's identity key.
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Base key the session was keyed under.
    pub fn our_base_key(&self) -> &[u8; 32] {
        &self.our_base_key
    }

    pub fn session_state(&self) -> &SessionState {
        &self.session_state
    }

    /// Numeric fingerprint of the remote identity key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    /// Whether the remote party has answered on this session.
    pub fn is_acknowledged(&self) -> bool {
        self.pending_pre_key.is_none()
    }

    /// A copy of this record carrying `session_state`.
    pub fn with_session_state(&self, session_state: SessionState) -> Self {
        Self {
            session_state,
            updated_at: now_millis().max(self.updated_at),
            ..self.clone()
        }
    }

    /// A copy of this record with the handshake marked as answered.
    pub fn acknowledged(self) -> Self {
        Self {
            pending_pre_key: None,
            ..self
        }
    }

    /// Serializes to the persisted JSON layout.
    pub fn to_json(&self) -> Result<Value, Error> {
        let persisted = PersistedRecord {
            address: Some(self.address.clone()),
            identity_key: Some(encoding::encode(self.identity_key.as_bytes())),
            our_base_key: Some(encoding::encode(&self.our_base_key)),
            session_state: Some(self.session_state.as_value().clone()),
            fingerprint: Some(self.fingerprint.clone()),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            pending_pre_key: self.pending_pre_key.clone(),
        };
        Ok(serde_json::to_value(persisted)?)
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }

    /// Restores a record from the persisted JSON layout.
    ///
    /// Every field except `pendingPreKey` is required; nothing is defaulted.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        let persisted = PersistedRecord::deserialize(value)?;

        let address = required(persisted.address, "address")?;
        let identity_key = decode_field(required(persisted.identity_key, "identityKey")?, "identityKey")?;
        let identity_key = IdentityKey::try_from(identity_key.as_slice())
            .map_err(|err| Error::CorruptRecord(format!("identityKey: {err}")))?;
        let our_base_key = decode_field(required(persisted.our_base_key, "ourBaseKey")?, "ourBaseKey")?;
        let our_base_key = encoding::to_array(&our_base_key).ok_or_else(|| {
            Error::CorruptRecord(format!("ourBaseKey must be 32 bytes, got {}", our_base_key.len()))
        })?;
        let session_state = required(persisted.session_state, "sessionState")?;
        if session_state.is_null() {
            return Err(Error::CorruptRecord("sessionState is null".to_string()));
        }
        let fingerprint = required(persisted.fingerprint, "fingerprint")?;
        let created_at = required(persisted.created_at, "createdAt")?;
        let updated_at = required(persisted.updated_at, "updatedAt")?;

        if !fingerprint::compare(&fingerprint, &identity_key.fingerprint()) {
            return Err(Error::CorruptRecord(
                "fingerprint does not match identityKey".to_string(),
            ));
        }
        if updated_at < created_at {
            return Err(Error::CorruptRecord("updatedAt precedes createdAt".to_string()));
        }

        Ok(Self {
            address,
            identity_key,
            our_base_key,
            session_state: SessionState(session_state),
            fingerprint,
            created_at,
            updated_at,
            pending_pre_key: persisted.pending_pre_key,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        Self::from_json(&serde_json::from_str(s)?)
    }
}

// Options so a missing field is reported by name instead of guessed; a
// present-but-null `sessionState` is caught separately.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRecord {
    address: Option<ProtocolAddress>,
    identity_key: Option<String>,
    our_base_key: Option<String>,
    session_state: Option<Value>,
    fingerprint: Option<String>,
    created_at: Option<u64>,
    updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_pre_key: Option<PendingPreKey>,
}

fn required<T>(field: Option<T>, name: &str) -> Result<T, Error> {
    field.ok_or_else(|| Error::CorruptRecord(format!("missing field {name}")))
}

fn decode_field(value: String, name: &str) -> Result<Vec<u8>, Error> {
    encoding::decode(&value).map_err(|err| Error::CorruptRecord(format!("{name}: {err}")))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
