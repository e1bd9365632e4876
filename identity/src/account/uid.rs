//! Chip UID parsing and canonicalisation.
//!
//! Readers and firmware disagree on how to print a UID: the web reader gives
//! `04:a1:b2:c3`, the tag firmware prints `04A1B2C3`, some admin tools use
//! dashes. All of them must map to the same identity, so every UID is
//! normalised to upper-case colon-delimited form before it touches a seed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::VALID_UID_LENGTHS;

/// Malformed chip UIDs. Always a caller bug, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UidError {
    #[error("chip UID is empty")]
    Empty,

    #[error("chip UID contains invalid hex: {0}")]
    InvalidHex(String),

    #[error("chip UID byte group '{0}' must be exactly two hex digits")]
    InvalidGroup(String),

    #[error("chip UID must be 4, 7 or 10 bytes, got {0}")]
    InvalidLength(usize),
}

/// A validated NFC chip UID in canonical form (`04:A1:B2:C3`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChipUid {
    canonical: String,
}

impl ChipUid {
    /// Parse a UID in colon, dash or contiguous hex form, any case.
    pub fn parse(input: &str) -> Result<Self, UidError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UidError::Empty);
        }

        let bytes = if trimmed.contains([':', '-']) {
            trimmed
                .split([':', '-'])
                .map(|group| {
                    if group.len() != 2 {
                        return Err(UidError::InvalidGroup(group.to_string()));
                    }
                    u8::from_str_radix(group, 16).map_err(|_| UidError::InvalidHex(group.into()))
                })
                .collect::<Result<Vec<u8>, UidError>>()?
        } else {
            hex::decode(trimmed).map_err(|_| UidError::InvalidHex(trimmed.to_string()))?
        };

        Self::from_bytes(&bytes)
    }

    /// Format raw reader bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UidError> {
        if !VALID_UID_LENGTHS.contains(&bytes.len()) {
            return Err(UidError::InvalidLength(bytes.len()));
        }
        let canonical = bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        Ok(Self { canonical })
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Raw UID bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.canonical
            .split(':')
            .filter_map(|g| u8::from_str_radix(g, 16).ok())
            .collect()
    }

    /// Number of UID bytes.
    pub fn byte_len(&self) -> usize {
        (self.canonical.len() + 1) / 3
    }
}

impl fmt::Display for ChipUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for ChipUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChipUid({})", self.canonical)
    }
}

impl FromStr for ChipUid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChipUid {
    type Error = UidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ChipUid> for String {
    fn from(uid: ChipUid) -> Self {
        uid.canonical
    }
}
