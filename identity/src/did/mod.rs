//! # DID Construction Layer
//!
//! Turns a raw Ed25519 public key into a self-describing `did:key`
//! identifier, and back. Pure functions only: no I/O, no randomness, no
//! clock. This is the one wire format in the engine that external parties
//! verify bit-for-bit, so it is pinned by published test vectors.

pub mod document;
pub mod key;

pub use document::{DidDocument, VerificationMethod};
pub use key::{
    create_did_key, decode_base58btc, ed25519_multibase, encode_base58btc, is_did_key, DidError,
    DidKey,
};
