use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::AddressError;

pub const MAX_ADDRESS_LENGTH: usize = 1023;

const ALLOCATION_SCHEMES: &[&str] = &[
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
];

/// A validated Interledger address such as `g.us-fed.ach.acmebank.acmecorp`.
#[derive(Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct IlpAddress(String);

impl IlpAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        if address.len() > MAX_ADDRESS_LENGTH {
            return Err(AddressError::TooLong {
                max: MAX_ADDRESS_LENGTH,
            });
        }
        let mut segments = address.split('.');
        let scheme = segments.next().unwrap_or_default();
        if !ALLOCATION_SCHEMES.contains(&scheme) {
            return Err(AddressError::UnknownScheme(scheme.to_owned()));
        }
        for segment in segments {
            let valid = !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'~' | b'-'));
            if !valid {
                return Err(AddressError::InvalidSegment(segment.to_owned()));
            }
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The allocation scheme, i.e. the first segment (`g`, `test`, `private`, ...).
    pub fn scheme(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Whether both addresses live on the same Interledger network.
    pub fn shares_network_with(&self, other: &IlpAddress) -> bool {
        self.scheme() == other.scheme()
    }

    pub fn with_suffix(&self, suffix: &str) -> Result<Self, AddressError> {
        Self::new(format!("{}.{}", self.0, suffix))
    }
}

impl FromStr for IlpAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for IlpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IlpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IlpAddress({})", self.0)
    }
}

/// Asset code and scale of an account, e.g. `USD` with scale 2 for cents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Denomination {
    pub asset_code: String,
    pub asset_scale: u8,
}

impl Denomination {
    pub fn new(asset_code: impl Into<String>, asset_scale: u8) -> Self {
        Self {
            asset_code: asset_code.into(),
            asset_scale,
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (scale {})", self.asset_code, self.asset_scale)
    }
}

/// Address and, if known, denomination of one side of the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub address: IlpAddress,
    pub denomination: Option<Denomination>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_scheme_and_segments() {
        assert!(IlpAddress::new("g.alice.wallet").is_ok());
        assert!(IlpAddress::new("test.bob-1~x_y").is_ok());
        assert!(matches!(
            IlpAddress::new("mars.alice"),
            Err(AddressError::UnknownScheme(_))
        ));
        assert!(matches!(
            IlpAddress::new("g..alice"),
            Err(AddressError::InvalidSegment(_))
        ));
        assert!(matches!(IlpAddress::new(""), Err(AddressError::Empty)));
        assert!(matches!(
            IlpAddress::new(format!("g.{}", "a".repeat(MAX_ADDRESS_LENGTH))),
            Err(AddressError::TooLong { .. })
        ));
    }

    #[test]
    fn network_compatibility_uses_scheme() {
        let alice: IlpAddress = "test.alice".parse().unwrap();
        let bob: IlpAddress = "test.bob.x".parse().unwrap();
        let carol: IlpAddress = "g.carol".parse().unwrap();
        assert!(alice.shares_network_with(&bob));
        assert!(!alice.shares_network_with(&carol));
    }
}
