use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEPARATOR: char = ':';

/// Stable identifier for one device of one contact.
///
/// An address is a plain value: once constructed it is never mutated, and
/// construction (or parsing its canonical `name:device_id` form) is the only
/// place it is validated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawAddress", into = "RawAddress")]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    /// Creates an address, rejecting empty names and names containing `:`.
    pub fn new(name: impl Into<String>, device_id: u32) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidAddress("name must not be empty".to_string()));
        }
        if name.contains(SEPARATOR) {
            return Err(Error::InvalidAddress(format!(
                "name must not contain '{SEPARATOR}': {name}"
            )));
        }

        Ok(Self { name, device_id })
    }

    /// Parses the canonical `name:device_id` form.
    pub fn from_string(s: &str) -> Result<Self, Error> {
        let mut parts = s.split(SEPARATOR);
        let (Some(name), Some(device_id), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::InvalidAddress(format!(
                "expected exactly one '{SEPARATOR}' in {s:?}"
            )));
        };

        if device_id.is_empty() || !device_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAddress(format!(
                "device id must be a non-negative integer: {device_id:?}"
            )));
        }
        let device_id = device_id
            .parse::<u32>()
            .map_err(|err| Error::InvalidAddress(format!("device id {device_id:?}: {err}")))?;

        Self::new(name, device_id)
    }

    /// The contact identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device identifier.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, SEPARATOR, self.device_id)
    }
}

impl FromStr for ProtocolAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddress {
    name: String,
    device_id: u32,
}

impl TryFrom<RawAddress> for ProtocolAddress {
    type Error = Error;

    fn try_from(value: RawAddress) -> Result<Self, Self::Error> {
        Self::new(value.name, value.device_id)
    }
}

impl From<ProtocolAddress> for RawAddress {
    fn from(value: ProtocolAddress) -> Self {
        Self {
            name: value.name,
            device_id: value.device_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_form() {
        let address = ProtocolAddress::new("alice@example.com", 3).unwrap();
        assert_eq!(address.to_string(), "alice@example.com:3");
        assert_eq!(address.name(), "alice@example.com");
        assert_eq!(address.device_id(), 3);
    }

    #[test]
    fn test_device_zero_is_valid() {
        let address = ProtocolAddress::from_string("bob:0").unwrap();
        assert_eq!(address.device_id(), 0);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(ProtocolAddress::new("", 1), Err(Error::InvalidAddress(_))));
        assert!(matches!(ProtocolAddress::new("a:b", 1), Err(Error::InvalidAddress(_))));

        for bad in ["bob", "bob:", ":1", "bob:1:2", "bob:-1", "bob:+1", "bob:x", "bob:99999999999"] {
            assert!(
                matches!(ProtocolAddress::from_string(bad), Err(Error::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_equality() {
        let a = ProtocolAddress::new("carol", 1).unwrap();
        let b: ProtocolAddress = "carol:1".parse().unwrap();
        let c = ProtocolAddress::new("carol", 2).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_shape() {
        let address = ProtocolAddress::new("dave", 7).unwrap();
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "dave", "deviceId": 7 }));

        let restored: ProtocolAddress = serde_json::from_value(json).unwrap();
        assert_eq!(restored, address);

        let invalid = serde_json::json!({ "name": "", "deviceId": 7 });
        assert!(serde_json::from_value::<ProtocolAddress>(invalid).is_err());
    }

    proptest! {
        #[test]
        fn prop_string_form_round_trips(name in "[a-zA-Z0-9@._+-]{1,40}", device_id in any::<u32>()) {
            let address = ProtocolAddress::new(name, device_id).unwrap();
            let parsed = ProtocolAddress::from_string(&address.to_string()).unwrap();
            prop_assert_eq!(parsed, address);
        }
    }
}
