use crate::keys::{IdentityKey, PreKeyRecord, SignedPreKeyRecord, X25519PublicKey};
use crate::{Error, encoding};
use serde::{Deserialize, Serialize};

/// Public signed pre-key as published in a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyPublic {
    pub key_id: u32,
    #[serde(with = "encoding::bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "encoding::bytes")]
    pub signature: Vec<u8>,
}

/// Public one-time pre-key as published in a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyPublic {
    pub key_id: u32,
    #[serde(with = "encoding::bytes")]
    pub public_key: Vec<u8>,
}

/// A contact's published key material, used to bootstrap a session.
///
/// Bundles arrive from untrusted sources, so fields are kept as raw bytes
/// until [`PreKeyBundle::validate`] checks them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    pub registration_id: u32,
    #[serde(with = "encoding::bytes")]
    pub identity_key: Vec<u8>,
    pub signed_pre_key: SignedPreKeyPublic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key: Option<PreKeyPublic>,
}

/// A bundle whose fields have the right shape. The signature is not yet checked.
#[derive(Clone, Debug)]
pub struct ValidatedBundle {
    pub registration_id: u32,
    pub identity_key: IdentityKey,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: X25519PublicKey,
    pub signature: Vec<u8>,
    pub pre_key_id: u32,
    pub pre_key: X25519PublicKey,
}

impl PreKeyBundle {
    /// Assembles a bundle from local key material for publishing.
    pub fn new(
        registration_id: u32,
        identity_key: &IdentityKey,
        signed_pre_key: &SignedPreKeyRecord,
        pre_key: Option<&PreKeyRecord>,
    ) -> Self {
        Self {
            registration_id,
            identity_key: identity_key.as_bytes().to_vec(),
            signed_pre_key: SignedPreKeyPublic {
                key_id: signed_pre_key.id(),
                public_key: signed_pre_key.public_key().to_bytes().to_vec(),
                signature: signed_pre_key.signature().to_vec(),
            },
            pre_key: pre_key.map(|pre_key| PreKeyPublic {
                key_id: pre_key.id(),
                public_key: pre_key.public_key().to_bytes().to_vec(),
            }),
        }
    }

    /// Checks that every field needed for key agreement is present and well-formed.
    pub fn validate(&self) -> Result<ValidatedBundle, Error> {
        let identity_key = IdentityKey::try_from(self.identity_key.as_slice())
            .map_err(|err| Error::InvalidBundle(format!("identity key: {err}")))?;

        let signed_pre_key = X25519PublicKey::try_from(self.signed_pre_key.public_key.as_slice())
            .map_err(|err| Error::InvalidBundle(format!("signed pre-key: {err}")))?;

        if self.signed_pre_key.signature.len() != 64 {
            return Err(Error::InvalidBundle(format!(
                "signed pre-key signature must be 64 bytes, got {}",
                self.signed_pre_key.signature.len()
            )));
        }

        let Some(pre_key) = &self.pre_key else {
            return Err(Error::InvalidBundle("missing one-time pre-key".to_string()));
        };
        let pre_key_public = X25519PublicKey::try_from(pre_key.public_key.as_slice())
            .map_err(|err| Error::InvalidBundle(format!("pre-key: {err}")))?;

        Ok(ValidatedBundle {
            registration_id: self.registration_id,
            identity_key,
            signed_pre_key_id: self.signed_pre_key.key_id,
            signed_pre_key,
            signature: self.signed_pre_key.signature.clone(),
            pre_key_id: pre_key.key_id,
            pre_key: pre_key_public,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};

    fn bundle() -> PreKeyBundle {
        let identity = IdentityKeyPair::generate().unwrap();
        let signed = SignedPreKeyRecord::generate(&identity, 1).unwrap();
        let pre_key = PreKeyRecord::generate(2).unwrap();
        PreKeyBundle::new(1234, &identity.public_key(), &signed, Some(&pre_key))
    }

    #[test]
    fn test_valid_bundle() {
        let validated = bundle().validate().unwrap();
        assert_eq!(validated.registration_id, 1234);
        assert_eq!(validated.signed_pre_key_id, 1);
        assert_eq!(validated.pre_key_id, 2);
    }

    #[test]
    fn test_missing_or_malformed_fields() {
        let mut missing_pre_key = bundle();
        missing_pre_key.pre_key = None;
        assert!(matches!(missing_pre_key.validate(), Err(Error::InvalidBundle(_))));

        let mut short_identity = bundle();
        short_identity.identity_key.truncate(32);
        assert!(matches!(short_identity.validate(), Err(Error::InvalidBundle(_))));

        let mut short_signature = bundle();
        short_signature.signed_pre_key.signature.pop();
        assert!(matches!(short_signature.validate(), Err(Error::InvalidBundle(_))));

        let mut empty_spk = bundle();
        empty_spk.signed_pre_key.public_key.clear();
        assert!(matches!(empty_spk.validate(), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_exchange_format() {
        let original = bundle();
        let json = serde_json::to_value(&original).unwrap();

        assert!(json["registrationId"].is_u64());
        assert!(json["identityKey"].is_string());
        assert!(json["signedPreKey"]["keyId"].is_u64());
        assert!(json["signedPreKey"]["signature"].is_string());
        assert!(json["preKey"]["publicKey"].is_string());

        let restored: PreKeyBundle = serde_json::from_value(json).unwrap();
        assert_eq!(restored, original);
    }
}
