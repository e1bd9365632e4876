//! Time-bound challenges and their verification.
//!
//! A challenge is 32 random bytes, hex-encoded, with an absolute expiry in
//! Unix milliseconds. The signed message is the hex string itself (its
//! ASCII bytes), so any verifier holding the string can check a signature
//! without agreeing on a decoding step.
//!
//! Verification order is fixed: input shape, then freshness, then crypto.
//! An expired challenge is rejected even with a perfect signature.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::AuthError;
use crate::config::{CHALLENGE_LENGTH, DEFAULT_CHALLENGE_TTL};
use crate::crypto::keys::KairosKeypair;
use crate::crypto::random::generate_secure_random;
use crate::crypto::signatures;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Reject anything that is not exactly 32 bytes of hex.
pub fn validate_challenge(challenge: &str) -> Result<(), AuthError> {
    if challenge.len() != CHALLENGE_LENGTH * 2 {
        return Err(AuthError::InvalidChallenge(format!(
            "expected {} hex chars, got {}",
            CHALLENGE_LENGTH * 2,
            challenge.len()
        )));
    }
    if !challenge.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AuthError::InvalidChallenge("not hex".into()));
    }
    Ok(())
}

/// An issued challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// 64 lowercase hex chars.
    pub challenge: String,
    /// Unix milliseconds after which the challenge is dead.
    pub expires_at: i64,
}

impl Challenge {
    /// Fresh challenge with the default five-minute lifetime.
    pub fn create() -> Result<Self, AuthError> {
        Self::create_with_ttl(DEFAULT_CHALLENGE_TTL)
    }

    pub fn create_with_ttl(ttl: Duration) -> Result<Self, AuthError> {
        Self::create_at(now_ms(), ttl)
    }

    /// Fresh challenge expiring `ttl` after `now_ms`.
    pub fn create_at(now_ms: i64, ttl: Duration) -> Result<Self, AuthError> {
        let nonce = generate_secure_random(CHALLENGE_LENGTH)?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Ok(Self {
            challenge: hex::encode(nonce),
            expires_at: now_ms.saturating_add(ttl_ms),
        })
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    /// `now > expiresAt`. The expiry instant itself is still valid.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// The bytes that get signed.
    pub fn message(&self) -> &[u8] {
        self.challenge.as_bytes()
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.challenge)
    }
}

/// Outcome of verifying a signed challenge.
///
/// Only `Verified` is a success. None of the others are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeVerdict {
    Verified,
    /// `now > expiresAt`. The signature was not looked at.
    Expired,
    /// Wrong key, tampered message, or malformed signature/key bytes.
    BadSignature,
    /// Not issued by this verifier, or already consumed.
    Unknown,
}

impl ChallengeVerdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, ChallengeVerdict::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeVerdict::Verified => "verified",
            ChallengeVerdict::Expired => "expired",
            ChallengeVerdict::BadSignature => "bad-signature",
            ChallengeVerdict::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChallengeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A challenge signed on the identity-owning device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedChallenge {
    pub challenge: String,
    /// Hex-encoded 64-byte signature.
    pub signature: String,
    /// Hex-encoded public key of the signer.
    pub public_key: String,
}

/// Authentication output handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub challenge: String,
    pub signature: String,
    pub public_key: String,
    pub verified: bool,
}

impl AuthenticationResult {
    pub fn new(signed: SignedChallenge, verdict: ChallengeVerdict) -> Self {
        Self {
            challenge: signed.challenge,
            signature: signed.signature,
            public_key: signed.public_key,
            verified: verdict.is_verified(),
        }
    }
}

/// Sign a challenge string with a keypair held in memory.
pub fn sign_challenge(keypair: &KairosKeypair, challenge: &str) -> Result<SignedChallenge, AuthError> {
    validate_challenge(challenge)?;
    let signature = keypair.sign(challenge.as_bytes());
    Ok(SignedChallenge {
        challenge: challenge.to_string(),
        signature: signature.to_hex(),
        public_key: keypair.public_key_hex(),
    })
}

/// Verify a signed challenge against a public key.
///
/// Errors only on a malformed challenge string. Expiry is checked first;
/// a bad signature or key is [`ChallengeVerdict::BadSignature`].
pub fn verify_challenge(
    signature: &[u8],
    challenge: &str,
    public_key: &[u8],
    expires_at: i64,
) -> Result<ChallengeVerdict, AuthError> {
    verify_challenge_at(signature, challenge, public_key, expires_at, now_ms())
}

/// [`verify_challenge`] against an explicit clock.
pub fn verify_challenge_at(
    signature: &[u8],
    challenge: &str,
    public_key: &[u8],
    expires_at: i64,
    now_ms: i64,
) -> Result<ChallengeVerdict, AuthError> {
    validate_challenge(challenge)?;
    if now_ms > expires_at {
        return Ok(ChallengeVerdict::Expired);
    }
    if signatures::verify(signature, challenge.as_bytes(), public_key) {
        Ok(ChallengeVerdict::Verified)
    } else {
        Ok(ChallengeVerdict::BadSignature)
    }
}

/// Verify a [`SignedChallenge`] whose hex fields came off the wire.
///
/// Undecodable signature or key hex counts as a bad signature, since it is
/// untrusted input rather than a caller bug.
pub fn verify_signed(signed: &SignedChallenge, expires_at: i64) -> Result<ChallengeVerdict, AuthError> {
    verify_signed_at(signed, expires_at, now_ms())
}

pub fn verify_signed_at(
    signed: &SignedChallenge,
    expires_at: i64,
    now_ms: i64,
) -> Result<ChallengeVerdict, AuthError> {
    let signature = hex::decode(&signed.signature).unwrap_or_default();
    let public_key = hex::decode(&signed.public_key).unwrap_or_default();
    verify_challenge_at(&signature, &signed.challenge, &public_key, expires_at, now_ms)
}
