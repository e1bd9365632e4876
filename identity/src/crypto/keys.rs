//! # Key Management
//!
//! Ed25519 keypairs for chip-derived and device-derived identities.
//!
//! Every identity in KairOS ultimately resolves to one of these: a chip tap
//! produces a seed, the seed becomes a [`KairosKeypair`], and the public half
//! becomes a `did:key`. This module handles creation, encoding and the basic
//! sign/verify operations.
//!
//! ## Security considerations
//!
//! - Secret keys are zeroized on drop (ed25519-dalek's `zeroize` feature).
//! - Keys derived from seeds are only as strong as the seed. Chip-derived
//!   seeds without a PIN are only as secret as the physical chip.
//! - Key bytes are never logged and never appear in `Debug` output.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

/// Errors that can occur while parsing key material.
///
/// Each of these means the caller handed us the wrong shape of data. A
/// well-formed signature that simply fails to verify is not an error; it
/// is a `false` from [`KairosPublicKey::verify`].
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key: expected {SECRET_KEY_LENGTH} bytes, got {0}")]
    InvalidSecretKey(usize),

    #[error("invalid public key: expected {VERIFYING_KEY_LENGTH} bytes of a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature: expected {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidSignature(usize),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// An Ed25519 keypair.
///
/// Intentionally not `Serialize`. A private key leaves memory only through
/// an explicit [`secret_key_bytes`](Self::secret_key_bytes) call, normally
/// straight into the vault.
///
/// # Examples
///
/// ```
/// use kairos_identity::crypto::keys::KairosKeypair;
///
/// let kp = KairosKeypair::from_seed(&[7u8; 32]);
/// let sig = kp.sign(b"hello chip");
/// assert!(kp.verify(b"hello chip", &sig));
/// ```
pub struct KairosKeypair {
    signing_key: SigningKey,
}

/// The public half of an identity, safe to hand to any verifier.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KairosPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

/// A 64-byte Ed25519 signature.
///
/// Stored as `Vec<u8>` for serde compatibility. Construction paths check the
/// length, and verification of a wrong-length value returns `false`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KairosSignature {
    bytes: Vec<u8>,
}

impl KairosKeypair {
    /// Constructs a keypair deterministically from a 32-byte seed.
    ///
    /// The seed is the Ed25519 secret key. Chip-derived identities come in
    /// through here, which is what makes "same chip, same key" hold.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a secret key slice of unknown length.
    pub fn from_slice(secret: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; SECRET_KEY_LENGTH] = secret
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey(secret.len()))?;
        Ok(Self::from_seed(&arr))
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = zeroize::Zeroizing::new(hex::decode(hex_str)?);
        Self::from_slice(&bytes)
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> KairosPublicKey {
        KairosPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> [u8; VERIFYING_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a message.
    ///
    /// PureEdDSA per RFC 8032: the message is hashed with SHA-512 inside the
    /// signature scheme, and the result is deterministic for a given
    /// (key, message) pair. Signing the same challenge twice yields the
    /// same 64 bytes.
    pub fn sign(&self, message: &[u8]) -> KairosSignature {
        KairosSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &KairosSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Exports the raw 32-byte secret key.
    ///
    /// Callers own the wiping of the returned array.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for KairosKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KairosKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KairosKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for KairosKeypair {
    /// Keypairs compare by public key. Secret bytes are never compared.
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for KairosKeypair {}

// ---------------------------------------------------------------------------
// KairosPublicKey
// ---------------------------------------------------------------------------

impl KairosPublicKey {
    /// Wrap raw bytes without point validation.
    ///
    /// Verification against an invalid point simply returns `false`, so
    /// this is safe for keys that arrive over the wire and are only ever
    /// used to verify.
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Length- and point-checked constructor.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; VERIFYING_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s)?;
        Self::try_from_slice(&bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    /// Verify a signature. Never panics; any malformed input is `false`.
    pub fn verify(&self, message: &[u8], signature: &KairosSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(dalek_sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    /// Hex-encoded representation. 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Hash for KairosPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for KairosPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for KairosPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KairosPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// KairosSignature
// ---------------------------------------------------------------------------

impl KairosSignature {
    /// Wrap a raw 64-byte signature.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Length-checked constructor.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature(slice.len()));
        }
        Ok(Self {
            bytes: slice.to_vec(),
        })
    }

    /// Parse a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s)?;
        Self::try_from_slice(&bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex-encoded representation. 128 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; SIGNATURE_LENGTH] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Display for KairosSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for KairosSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "KairosSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "KairosSignature({})", hex_str)
        }
    }
}
