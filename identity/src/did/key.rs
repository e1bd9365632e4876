//! # did:key for Ed25519
//!
//! Bit-exact construction of `did:key` identifiers from Ed25519 public keys:
//!
//! ```text
//! did:key:z<base58btc(0xed 0x01 || public_key)>
//! ```
//!
//! The identifier is a pure function of the public key. Same key, same
//! string; different keys, different strings. No registry, no resolution
//! round-trip. A verifier can recover the key straight from the DID.
//!
//! Base58btc (Bitcoin alphabet, no `0OIl`) treats the input as a big-endian
//! integer and keeps each leading zero byte as a leading `'1'`, so keys
//! that start with `0x00` survive the round trip. The 0xed01 prefix means
//! the encoded payload never starts with zero here, but the helpers below
//! are used on raw keys too.
//!
//! Every Ed25519 did:key starts `did:key:z6Mk`. If yours doesn't, the
//! multicodec prefix is wrong.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    DID_KEY_PREFIX, DID_METHOD_PREFIX, ED25519_MULTICODEC_PREFIX, MULTIBASE_BASE58BTC,
    VERIFYING_KEY_LENGTH,
};
use crate::crypto::keys::KairosPublicKey;

/// Errors from parsing DID strings. Construction from a key cannot fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DidError {
    #[error("invalid DID format: {0}")]
    InvalidFormat(String),

    #[error("unsupported DID method: expected 'key', got '{0}'")]
    UnsupportedMethod(String),

    #[error("unsupported multibase encoding '{0}': expected 'z' (base58btc)")]
    UnsupportedMultibase(char),

    #[error("invalid base58btc payload: {0}")]
    InvalidBase58(String),

    #[error("unsupported multicodec prefix {0:02x}{1:02x}: expected ed01 (Ed25519)")]
    UnsupportedMulticodec(u8, u8),

    #[error("invalid key length: expected {VERIFYING_KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Encode bytes as base58btc (Bitcoin alphabet).
pub fn encode_base58btc(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decode a base58btc string.
pub fn decode_base58btc(s: &str) -> Result<Vec<u8>, DidError> {
    bs58::decode(s)
        .into_vec()
        .map_err(|e| DidError::InvalidBase58(e.to_string()))
}

/// Multibase-encode a raw Ed25519 public key: `z` + base58btc(0xed01 || pk).
///
/// This is the method-specific identifier of a did:key and also the
/// `publicKeyMultibase` value in its DID document.
pub fn ed25519_multibase(public_key: &[u8; VERIFYING_KEY_LENGTH]) -> String {
    let mut multicodec = Vec::with_capacity(ED25519_MULTICODEC_PREFIX.len() + public_key.len());
    multicodec.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
    multicodec.extend_from_slice(public_key);
    format!("{}{}", MULTIBASE_BASE58BTC, encode_base58btc(&multicodec))
}

/// Build the did:key string for a raw 32-byte Ed25519 public key.
pub fn create_did_key(public_key: &[u8; VERIFYING_KEY_LENGTH]) -> String {
    format!("{}{}", DID_METHOD_PREFIX, ed25519_multibase(public_key))
}

/// A parsed Ed25519 `did:key`.
///
/// Holds only the public key; the string form is recomputed on demand and
/// is guaranteed canonical. Serializes as the DID string.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DidKey {
    public_key: KairosPublicKey,
}

impl DidKey {
    /// Wrap a public key.
    pub fn from_public_key(public_key: &KairosPublicKey) -> Self {
        Self {
            public_key: public_key.clone(),
        }
    }

    /// Parse a `did:key:z...` string and recover the embedded public key.
    ///
    /// Checks, in order: the `did:` scheme, the `key` method, the `z`
    /// multibase marker, base58btc validity, the 0xed01 multicodec prefix,
    /// and a 32-byte key.
    pub fn parse(did: &str) -> Result<Self, DidError> {
        let parts: Vec<&str> = did.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(DidError::InvalidFormat(
                "DID must have format 'did:<method>:<identifier>'".into(),
            ));
        }
        if parts[0] != "did" {
            return Err(DidError::InvalidFormat(format!(
                "expected 'did' prefix, got '{}'",
                parts[0]
            )));
        }
        if parts[1] != "key" {
            return Err(DidError::UnsupportedMethod(parts[1].to_string()));
        }

        let identifier = parts[2];
        let mut chars = identifier.chars();
        match chars.next() {
            Some(MULTIBASE_BASE58BTC) => {}
            Some(other) => return Err(DidError::UnsupportedMultibase(other)),
            None => return Err(DidError::InvalidFormat("empty method identifier".into())),
        }

        let decoded = decode_base58btc(chars.as_str())?;
        if decoded.len() < ED25519_MULTICODEC_PREFIX.len() {
            return Err(DidError::InvalidKeyLength(decoded.len()));
        }
        let (prefix, key) = decoded.split_at(ED25519_MULTICODEC_PREFIX.len());
        if prefix != ED25519_MULTICODEC_PREFIX {
            return Err(DidError::UnsupportedMulticodec(prefix[0], prefix[1]));
        }
        let key: [u8; VERIFYING_KEY_LENGTH] = key
            .try_into()
            .map_err(|_| DidError::InvalidKeyLength(key.len()))?;

        Ok(Self {
            public_key: KairosPublicKey::from_bytes(key),
        })
    }

    /// The full DID string.
    pub fn to_did_string(&self) -> String {
        create_did_key(self.public_key.as_bytes())
    }

    /// The multibase fingerprint (the part after `did:key:`).
    pub fn fingerprint(&self) -> String {
        ed25519_multibase(self.public_key.as_bytes())
    }

    /// The embedded public key.
    pub fn public_key(&self) -> &KairosPublicKey {
        &self.public_key
    }
}

impl fmt::Display for DidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_did_string())
    }
}

impl fmt::Debug for DidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DidKey({})", self.to_did_string())
    }
}

impl FromStr for DidKey {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DidKey {
    type Error = DidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DidKey> for String {
    fn from(did: DidKey) -> Self {
        did.to_did_string()
    }
}

/// Sanity check used by callers that only hold a string.
pub fn is_did_key(s: &str) -> bool {
    s.starts_with(DID_KEY_PREFIX) && DidKey::parse(s).is_ok()
}
