//! Short numeric fingerprints of public keys for human verification.

use crate::Error;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of decimal digits in a fingerprint.
pub const FINGERPRINT_DIGITS: usize = 12;

const MODULUS: u64 = 1_000_000_000_000;

/// Derives a 12-digit decimal fingerprint from a public key.
///
/// The key is hashed with SHA-256 and the last 6 bytes of the digest are read
/// as a big-endian integer. 48 bits can exceed 12 digits, so the value is
/// reduced modulo 10^12 before being zero-padded.
pub fn generate(public_key: &[u8]) -> Result<String, Error> {
    if public_key.is_empty() {
        return Err(Error::InvalidKey("cannot fingerprint an empty key".to_string()));
    }

    Ok(digest(public_key))
}

/// Decodes a URL-safe base64 key (padding optional) and fingerprints it.
pub fn from_base64url(key: &str) -> Result<String, Error> {
    let bytes = URL_SAFE_NO_PAD
        .decode(key.trim_end_matches('='))
        .map_err(|err| Error::InvalidKey(err.to_string()))?;
    generate(&bytes)
}

/// Compares two fingerprints without leaking where they differ.
///
/// Differing lengths return `false` straight away; equal-length inputs are
/// compared byte-wise in constant time.
pub fn compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub(crate) fn digest(public_key: &[u8]) -> String {
    let hash = Sha256::digest(public_key);

    let mut tail = [0u8; 8];
    tail[2..].copy_from_slice(&hash[hash.len() - 6..]);
    let value = u64::from_be_bytes(tail) % MODULUS;

    format!("{value:0width$}", width = FINGERPRINT_DIGITS)
}
