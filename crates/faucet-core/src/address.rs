//! Canonical account identifiers.
#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte account identifier in canonical form: lower-cased hex with a
/// `0x` prefix, exactly 40 hex characters.
///
/// Construction always validates; a value of this type is safe to interpolate
/// into RPC filter objects without further checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EthAddress(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid address format: expected a 0x-prefixed 40-hex-character string")]
pub struct InvalidAddress;

impl EthAddress {
    /// Parse and canonicalize. Mixed-case input is accepted and lower-cased.
    pub fn parse(s: &str) -> Result<Self, InvalidAddress> {
        let body = s.strip_prefix("0x").ok_or(InvalidAddress)?;
        if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidAddress);
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw 20-byte form used by ABI encoding and signing.
    pub fn h160(&self) -> ethers::types::Address {
        let bytes = hex::decode(&self.0[2..]).expect("canonical form is valid hex");
        ethers::types::Address::from_slice(&bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ethers::types::Address> for EthAddress {
    fn from(a: ethers::types::Address) -> Self {
        // `{:#x}` prints the full lower-cased 40-hex form.
        Self(format!("{a:#x}"))
    }
}

impl Serialize for EthAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EthAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EthAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_canonicalizes_mixed_case() {
        let a = EthAddress::parse("0x8549E82239a88f463ab6E55Ad1895b629a00Def3").unwrap();
        assert_eq!(a.as_str(), "0x8549e82239a88f463ab6e55ad1895b629a00def3");
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "",
            "0x",
            "8549e82239a88f463ab6e55ad1895b629a00def3", // missing prefix
            "0x8549e82239a88f463ab6e55ad1895b629a00def",  // 39 chars
            "0x8549e82239a88f463ab6e55ad1895b629a00def31", // 41 chars
            "0x8549e82239a88f463ab6e55ad1895b629a00defg", // non-hex
        ] {
            assert!(EthAddress::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn round_trips_through_h160() {
        let a = EthAddress::parse("0xE7C3D8C9a439feDe00D2600032D5dB0Be71C3c29").unwrap();
        let back = EthAddress::from(a.h160());
        assert_eq!(a, back);
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: EthAddress =
            serde_json::from_str("\"0x8549E82239a88f463ab6E55Ad1895b629a00Def3\"").unwrap();
        assert_eq!(ok.as_str(), "0x8549e82239a88f463ab6e55ad1895b629a00def3");
        assert!(serde_json::from_str::<EthAddress>("\"0x123\"").is_err());
    }

    #[test]
    fn zero_address_detection() {
        let zero = EthAddress::parse("0x0000000000000000000000000000000000000000").unwrap();
        assert!(zero.is_zero());
        let nonzero = EthAddress::parse("0x0000000000000000000000000000000000000001").unwrap();
        assert!(!nonzero.is_zero());
    }
}
