//! On-chain settlement destination addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

const ADDRESS_PREFIX: &str = "0x";
const ADDRESS_HEX_LEN: usize = 40;
const ADDRESS_LEN: usize = ADDRESS_PREFIX.len() + ADDRESS_HEX_LEN;

/// A `0x`-prefixed, 40-hex-digit account address.
///
/// The original casing is preserved; no checksum validation is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SettlementAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must be 42 characters, got {0}")]
    InvalidLength(usize),
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address contains non-hex characters")]
    InvalidHex,
}

impl SettlementAddress {
    /// Parse a complete address string.
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let value = value.trim();
        if value.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(value.len()));
        }
        if !value.starts_with(ADDRESS_PREFIX) {
            return Err(AddressError::MissingPrefix);
        }
        if !value.as_bytes()[ADDRESS_PREFIX.len()..]
            .iter()
            .all(u8::is_ascii_hexdigit)
        {
            return Err(AddressError::InvalidHex);
        }
        Ok(Self(value.to_owned()))
    }

    /// Find the leftmost address token embedded in free text.
    ///
    /// A token is `0x` followed by 40 hex digits. Trailing characters are
    /// not inspected, so a longer hex run yields its first 40 digits.
    pub fn find_in_memo(memo: &str) -> Option<Self> {
        let bytes = memo.as_bytes();
        if bytes.len() < ADDRESS_LEN {
            return None;
        }
        (0..=bytes.len() - ADDRESS_LEN).find_map(|start| {
            let candidate = &bytes[start..start + ADDRESS_LEN];
            let is_match = candidate.starts_with(ADDRESS_PREFIX.as_bytes())
                && candidate[ADDRESS_PREFIX.len()..]
                    .iter()
                    .all(u8::is_ascii_hexdigit);
            // Every byte of a match is ASCII, so the slice bounds are char boundaries.
            is_match.then(|| Self(memo[start..start + ADDRESS_LEN].to_owned()))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SettlementAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SettlementAddress> for String {
    fn from(value: SettlementAddress) -> Self {
        value.0
    }
}

impl fmt::Display for SettlementAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
