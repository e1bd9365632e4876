//! # Digital Signatures
//!
//! Free-function Ed25519 signing and verification over raw byte slices.
//!
//! [`KairosKeypair`] and [`KairosPublicKey`] already sign and verify. These
//! wrappers exist for the boundary: callers that hold key material as bytes
//! or hex strings (API payloads, stored records, embedded verifier nodes)
//! go through here so the failure semantics are identical everywhere:
//!
//! - **Signing** with a wrong-length secret key is an input-shape error.
//! - **Verification** never errors. Wrong lengths, bad hex, invalid points
//!   and tampered signatures all come back as `false`.

use super::keys::{KairosKeypair, KairosPublicKey, KairosSignature, KeyError};

/// Sign `message` with a raw 32-byte Ed25519 secret key.
///
/// Deterministic: the same (message, key) pair always yields the same
/// signature.
pub fn sign(message: &[u8], secret_key: &[u8]) -> Result<KairosSignature, KeyError> {
    let keypair = KairosKeypair::from_slice(secret_key)?;
    Ok(keypair.sign(message))
}

/// Verify a raw signature over `message` against a raw public key.
///
/// Returns `false` for any malformed input rather than raising.
pub fn verify(signature: &[u8], message: &[u8], public_key: &[u8]) -> bool {
    let Ok(public_key) = KairosPublicKey::try_from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = KairosSignature::try_from_slice(signature) else {
        return false;
    };
    public_key.verify(message, &signature)
}

/// Hex-encoded variant of [`verify`], for payloads that carry keys and
/// signatures as strings.
pub fn verify_hex(signature_hex: &str, message: &[u8], public_key_hex: &str) -> bool {
    let (Ok(signature), Ok(public_key)) = (hex::decode(signature_hex), hex::decode(public_key_hex))
    else {
        return false;
    };
    verify(&signature, message, &public_key)
}
