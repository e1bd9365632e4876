//! # DID Documents
//!
//! A did:key resolves locally: the document is fully determined by the key
//! inside the identifier. This module expands a [`DidKey`] into the W3C DID
//! Core document shape so external resolvers and verifiers that expect JSON
//! get what they expect.
//!
//! ## Standards References
//!
//! - [DID Core v1.0](https://www.w3.org/TR/did-core/)
//! - [The did:key Method](https://w3c-ccg.github.io/did-method-key/)
//! - [Ed25519VerificationKey2020](https://w3c-ccg.github.io/di-eddsa-2020/)

use serde::{Deserialize, Serialize};

use super::key::{DidError, DidKey};
use crate::config::{DID_CONTEXT, DID_KEY_PREFIX, ED25519_CONTEXT, VERIFICATION_KEY_TYPE};

/// A W3C DID Document for an Ed25519 did:key.
///
/// Single key, referenced from both `authentication` and `assertionMethod`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    /// JSON-LD context URIs.
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The DID this document describes.
    pub id: String,

    /// Verification methods associated with this DID.
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,

    /// Verification method references usable for authentication.
    pub authentication: Vec<String>,

    /// Verification method references usable for issuing assertions.
    #[serde(rename = "assertionMethod")]
    pub assertion_method: Vec<String>,
}

/// A single key entry in a [`DidDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// DID URL of this key: `<did>#<fingerprint>`.
    pub id: String,

    /// Key type, always `Ed25519VerificationKey2020` here.
    #[serde(rename = "type")]
    pub type_: String,

    /// The DID that controls this key.
    pub controller: String,

    /// `z` + base58btc(0xed01 || public key).
    #[serde(rename = "publicKeyMultibase")]
    pub public_key_multibase: String,
}

impl DidKey {
    /// Expand into a DID document.
    pub fn to_document(&self) -> DidDocument {
        let did = self.to_did_string();
        let fingerprint = self.fingerprint();
        let key_id = format!("{}#{}", did, fingerprint);

        DidDocument {
            context: vec![DID_CONTEXT.to_string(), ED25519_CONTEXT.to_string()],
            id: did.clone(),
            verification_method: vec![VerificationMethod {
                id: key_id.clone(),
                type_: VERIFICATION_KEY_TYPE.to_string(),
                controller: did,
                public_key_multibase: fingerprint,
            }],
            authentication: vec![key_id.clone()],
            assertion_method: vec![key_id],
        }
    }
}

impl DidDocument {
    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Structural validation.
    ///
    /// Beyond the field checks, a did:key document must be exactly what
    /// its own identifier expands to; anything else has been tampered with.
    pub fn validate(&self) -> Result<(), DidError> {
        if !self.id.starts_with(DID_KEY_PREFIX) {
            return Err(DidError::InvalidFormat(
                "document id must start with 'did:key:z'".into(),
            ));
        }
        if !self.context.iter().any(|c| c == DID_CONTEXT) {
            return Err(DidError::InvalidFormat(
                "document must include DID Core context".into(),
            ));
        }
        if self.verification_method.is_empty() || self.authentication.is_empty() {
            return Err(DidError::InvalidFormat(
                "document must have a verification method and an authentication reference".into(),
            ));
        }

        let expected = DidKey::parse(&self.id)?.to_document();
        if *self != expected {
            return Err(DidError::InvalidFormat(
                "document does not match its did:key expansion".into(),
            ));
        }
        Ok(())
    }
}
