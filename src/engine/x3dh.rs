use crate::Error;
use crate::bundle::ValidatedBundle;
use crate::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord, X25519PublicKey, X25519Secret};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroizing;

const SALT: &[u8] = b"Parley-E2E-X3DH";

/// Output of the initiator's half of the agreement.
pub(crate) struct X3dhInitiation {
    pub(crate) shared_secret: Zeroizing<[u8; 32]>,
    /// Ephemeral public key the responder needs to repeat the agreement.
    pub(crate) base_key: X25519PublicKey,
}

/// Extended Triple Diffie-Hellman key agreement.
///
/// Both parties combine their identity keys with the responder's signed
/// pre-key, optional one-time pre-key and the initiator's ephemeral key to
/// reach the same secret without the responder being online.
pub(crate) struct X3dh<'a> {
    info: &'a [u8],
}

impl<'a> X3dh<'a> {
    pub(crate) fn new(info: &'a [u8]) -> Self {
        Self { info }
    }

    /// The initiator's half. The bundle's signature must already be verified.
    pub(crate) fn initiate(
        &self,
        our_identity: &IdentityKeyPair,
        bundle: &ValidatedBundle,
    ) -> Result<X3dhInitiation, Error> {
        let ephemeral = X25519Secret::generate()?;
        let their_identity = bundle.identity_key.dh_public();

        // DH1 = DH(IKa, SPKb)
        let dh1 = our_identity.dh(&bundle.signed_pre_key)?;
        // DH2 = DH(EKa, IKb)
        let dh2 = ephemeral.dh(&their_identity)?;
        // DH3 = DH(EKa, SPKb)
        let dh3 = ephemeral.dh(&bundle.signed_pre_key)?;
        // DH4 = DH(EKa, OPKb)
        let dh4 = ephemeral.dh(&bundle.pre_key)?;

        Ok(X3dhInitiation {
            shared_secret: self.calculate_shared_secret(dh1, dh2, dh3, Some(dh4))?,
            base_key: ephemeral.public_key(),
        })
    }

    /// The responder's half, repeating the initiator's computations.
    pub(crate) fn accept(
        &self,
        our_identity: &IdentityKeyPair,
        signed_pre_key: &SignedPreKeyRecord,
        pre_key: Option<&PreKeyRecord>,
        their_identity: &IdentityKey,
        their_base_key: &X25519PublicKey,
    ) -> Result<Zeroizing<[u8; 32]>, Error> {
        // DH1 = DH(SPKb, IKa)
        let dh1 = signed_pre_key.dh(&their_identity.dh_public())?;
        // DH2 = DH(IKb, EKa)
        let dh2 = our_identity.dh(their_base_key)?;
        // DH3 = DH(SPKb, EKa)
        let dh3 = signed_pre_key.dh(their_base_key)?;
        // DH4 = DH(OPKb, EKa)
        let dh4 = pre_key.map(|pre_key| pre_key.dh(their_base_key)).transpose()?;

        self.calculate_shared_secret(dh1, dh2, dh3, dh4)
    }

    fn calculate_shared_secret(
        &self,
        dh1: SharedSecret,
        dh2: SharedSecret,
        dh3: SharedSecret,
        dh4: Option<SharedSecret>,
    ) -> Result<Zeroizing<[u8; 32]>, Error> {
        // IKM = DH1 || DH2 || DH3 || DH4 (if available)
        let mut key_material = Zeroizing::new(Vec::with_capacity(128));
        key_material.extend_from_slice(dh1.as_bytes());
        key_material.extend_from_slice(dh2.as_bytes());
        key_material.extend_from_slice(dh3.as_bytes());
        if let Some(dh4) = dh4 {
            key_material.extend_from_slice(dh4.as_bytes());
        }

        let hkdf = Hkdf::<Sha256>::new(Some(SALT), &key_material);
        let mut shared_secret = Zeroizing::new([0u8; 32]);
        hkdf.expand(self.info, shared_secret.as_mut_slice())
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

        Ok(shared_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PreKeyBundle;

    struct Responder {
        identity: IdentityKeyPair,
        signed_pre_key: SignedPreKeyRecord,
        pre_key: PreKeyRecord,
    }

    fn responder() -> Responder {
        let identity = IdentityKeyPair::generate().unwrap();
        Responder {
            signed_pre_key: SignedPreKeyRecord::generate(&identity, 1).unwrap(),
            pre_key: PreKeyRecord::generate(2).unwrap(),
            identity,
        }
    }

    fn bundle(bob: &Responder) -> ValidatedBundle {
        PreKeyBundle::new(1, &bob.identity.public_key(), &bob.signed_pre_key, Some(&bob.pre_key))
            .validate()
            .unwrap()
    }

    #[test]
    fn test_x3dh_key_agreement() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = responder();
        let x3dh = X3dh::new(b"Test-Protocol-Info");

        let initiation = x3dh.initiate(&alice, &bundle(&bob)).unwrap();
        let bob_secret = x3dh
            .accept(
                &bob.identity,
                &bob.signed_pre_key,
                Some(&bob.pre_key),
                &alice.public_key(),
                &initiation.base_key,
            )
            .unwrap();

        assert_eq!(*initiation.shared_secret, *bob_secret);
    }

    #[test]
    fn test_missing_pre_key_diverges() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = responder();
        let x3dh = X3dh::new(b"Test-Protocol-Info");

        let initiation = x3dh.initiate(&alice, &bundle(&bob)).unwrap();
        let bob_secret = x3dh
            .accept(
                &bob.identity,
                &bob.signed_pre_key,
                None,
                &alice.public_key(),
                &initiation.base_key,
            )
            .unwrap();

        assert_ne!(*initiation.shared_secret, *bob_secret);
    }

    #[test]
    fn test_info_separates_secrets() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = responder();
        let bundle = bundle(&bob);

        let first = X3dh::new(b"Protocol-Info-1").initiate(&alice, &bundle).unwrap();
        let second = X3dh::new(b"Protocol-Info-2").initiate(&alice, &bundle).unwrap();
        assert_ne!(*first.shared_secret, *second.shared_secret);
    }
}
