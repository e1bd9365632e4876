//! # Hashing Utilities
//!
//! SHA-256 for account ids and PIN verifiers, SHA-512 for callers that need
//! the Ed25519-internal digest explicitly (test vectors, fingerprints).
//! The key derivation functions in [`super::kdf`] bring their own HMAC.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 digest as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-512 digest as a fixed-size array.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}
