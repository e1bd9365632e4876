//! # Primitive Crypto Layer
//!
//! The leaf of the identity stack. Every key, signature, derived seed and
//! encrypted blob flows through here, and nothing here knows what a chip,
//! a DID or an account is.
//!
//! - **Ed25519** for identity keys and challenge signatures.
//! - **HKDF-SHA256** for seed and device sub-key derivation.
//! - **PBKDF2-HMAC-SHA256 + AES-256-GCM** for secrets at rest.
//! - **OsRng** as the only randomness source.
//!
//! Failure semantics are uniform across the layer: malformed input shapes
//! (wrong lengths, bad hex) are errors, a signature that does not verify is
//! `false`, and an unavailable RNG is a [`random::RandomError`].

pub mod encryption;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod signatures;

pub use encryption::{decrypt, encrypt, EncryptionError};
pub use hash::{sha256, sha256_hex, sha512};
pub use kdf::{derive_key, derive_key_array, pbkdf2_sha256, KdfError};
pub use keys::{KairosKeypair, KairosPublicKey, KairosSignature, KeyError};
pub use random::{constant_time_eq, generate_keypair, generate_secure_random, RandomError};
pub use signatures::{sign, verify, verify_hex};
