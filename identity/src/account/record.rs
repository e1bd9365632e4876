//! Account records and their public summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::uid::ChipUid;
use crate::config::{ACCOUNT_ID_HEX_LENGTH, ACCOUNT_ID_PREFIX};
use crate::crypto::hash::sha256_hex;
use crate::crypto::keys::KairosPublicKey;

/// Human-shareable account id: `kairos_` + first 16 hex chars of SHA-256(pk).
pub fn account_id_for(public_key: &KairosPublicKey) -> String {
    let digest = sha256_hex(public_key.as_bytes());
    format!("{ACCOUNT_ID_PREFIX}{}", &digest[..ACCOUNT_ID_HEX_LENGTH])
}

/// One chip's account, indexed by canonical chip UID.
///
/// Created on the first tap, bumped on every later verified tap, and only
/// ever removed by an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[serde(rename = "chipUID")]
    pub chip_uid: ChipUid,
    pub did: String,
    pub account_id: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub verification_count: u64,
    #[serde(rename = "hasPIN")]
    pub has_pin: bool,
    /// Hex PBKDF2 verifier of the PIN, only when PIN verifiers are enabled.
    #[serde(rename = "encryptedPIN", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl AccountRecord {
    /// The outward-facing view handed to callers and the HTTP API.
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            did: self.did.clone(),
            account_id: self.account_id.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
            verification_count: self.verification_count,
        }
    }

    /// Whether `public_key` is the key recorded for this chip.
    pub fn matches_key(&self, public_key: &KairosPublicKey) -> bool {
        self.public_key.eq_ignore_ascii_case(&public_key.to_hex())
    }
}

/// Identity creation / lookup output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub did: String,
    pub account_id: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub verification_count: u64,
}
