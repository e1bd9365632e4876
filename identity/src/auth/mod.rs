//! # Challenge-Response Authentication
//!
//! Proves possession of a derived private key to a remote verifier without
//! ever moving the key.
//!
//! ```text
//! CHALLENGE_ISSUED → SIGNED_LOCALLY → SUBMITTED → { VERIFIED | REJECTED | EXPIRED }
//! ```
//!
//! Verification needs only the public key, the challenge and the
//! signature, so it runs on any machine, including a disconnected
//! embedded verifier that has never seen the signing device.

pub mod authenticator;
pub mod challenge;

pub use authenticator::{ChallengeIssuer, DeviceSigner, TapAuthenticator, TapOutcome};
pub use challenge::{
    now_ms, sign_challenge, validate_challenge, verify_challenge, verify_challenge_at,
    verify_signed, AuthenticationResult, Challenge, ChallengeVerdict, SignedChallenge,
};

use thiserror::Error;

use crate::account::AccountError;
use crate::crypto::random::RandomError;
use crate::store::StoreError;

/// Errors from the authentication layer.
///
/// A rejected signature or an expired challenge is a
/// [`ChallengeVerdict`], not one of these.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error(transparent)]
    Random(#[from] RandomError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
