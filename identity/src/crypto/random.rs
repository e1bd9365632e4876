//! # Secure Randomness & Constant-Time Comparison
//!
//! The single source of randomness for seeds, salts, IVs, device ids and
//! challenge nonces. Everything pulls from `OsRng` through
//! [`generate_secure_random`]; nothing in the crate reaches for a userspace
//! PRNG.
//!
//! RNG failure is a resource failure, not a programming error. It is
//! surfaced as [`RandomError::Unavailable`] so callers can tell it apart
//! from malformed input and from a failed verification.

use rand::rngs::OsRng;
use rand_core::RngCore;
use thiserror::Error;

use super::keys::KairosKeypair;
use crate::config::SIGNING_KEY_LENGTH;

/// Errors from the system random number generator.
#[derive(Debug, Error)]
pub enum RandomError {
    /// The OS entropy source refused to produce bytes.
    #[error("secure random number generator unavailable: {0}")]
    Unavailable(String),
}

/// Fill a fresh buffer of `length` bytes from the OS CSPRNG.
///
/// A zero `length` is allowed and returns an empty vector.
pub fn generate_secure_random(length: usize) -> Result<Vec<u8>, RandomError> {
    let mut buf = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| RandomError::Unavailable(e.to_string()))?;
    Ok(buf)
}

/// Fixed-size variant of [`generate_secure_random`].
pub fn random_array<const N: usize>() -> Result<[u8; N], RandomError> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| RandomError::Unavailable(e.to_string()))?;
    Ok(buf)
}

/// Generate a uniformly random Ed25519 keypair.
///
/// The 32-byte secret is drawn from the OS RNG and the public key derived
/// from it. The temporary seed buffer is wiped before returning.
pub fn generate_keypair() -> Result<KairosKeypair, RandomError> {
    let seed = zeroize::Zeroizing::new(random_array::<SIGNING_KEY_LENGTH>()?);
    Ok(KairosKeypair::from_seed(&seed))
}

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Unequal lengths return `false` immediately; length is not secret in any
/// of our call sites. Equal-length inputs are XOR-accumulated over every
/// byte so the running time does not depend on where they differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    // black_box keeps the optimizer from turning the fold into an early exit.
    std::hint::black_box(diff) == 0
}
