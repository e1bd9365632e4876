//! # Key Derivation
//!
//! Two KDFs, two jobs:
//!
//! - **HKDF-SHA256** (RFC 5869) turns high-entropy material into independent
//!   sub-keys: chip identity seeds, and per-device keys from a master seed.
//!   Extract-then-expand is one-way, so a leaked device key says nothing
//!   about the master seed or about sibling devices.
//! - **PBKDF2-HMAC-SHA256** stretches low-entropy secrets (passphrases, PINs)
//!   before they key AES-GCM or become a stored verifier.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, HKDF_MAX_OUTPUT_LENGTH};

/// Errors from key derivation. All of them are caller mistakes.
#[derive(Debug, Error)]
pub enum KdfError {
    #[error("requested output length {0} outside 1..={HKDF_MAX_OUTPUT_LENGTH}")]
    InvalidLength(usize),

    #[error("input keying material must not be empty")]
    EmptyInput,

    #[error("PBKDF2 iteration count must be positive")]
    ZeroIterations,
}

/// HKDF-SHA256: extract with `salt`, expand with `info` to `length` bytes.
///
/// The output is wrapped in [`Zeroizing`] since it is almost always secret.
pub fn derive_key(
    input_key: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    if input_key.is_empty() {
        return Err(KdfError::EmptyInput);
    }
    if length == 0 || length > HKDF_MAX_OUTPUT_LENGTH {
        return Err(KdfError::InvalidLength(length));
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), input_key);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hk.expand(info, &mut okm)
        .map_err(|_| KdfError::InvalidLength(length))?;
    Ok(okm)
}

/// Fixed-size HKDF-SHA256 output.
pub fn derive_key_array<const N: usize>(
    input_key: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; N]>, KdfError> {
    let okm = derive_key(input_key, salt, info, N)?;
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&okm);
    Ok(out)
}

/// PBKDF2-HMAC-SHA256 producing an AES-256 key.
pub fn pbkdf2_sha256(
    secret: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, KdfError> {
    if iterations == 0 {
        return Err(KdfError::ZeroIterations);
    }
    Ok(Zeroizing::new(pbkdf2_hmac_array::<Sha256, AES_KEY_LENGTH>(
        secret, salt, iterations,
    )))
}
