//! # Vault Module — Secrets at Rest
//!
//! The only place a master seed is written down, and then only sealed
//! under a passphrase. Plaintext seeds exist in memory, briefly, and
//! nowhere else.
//!
//! ```text
//! keystore.rs — versioned PBKDF2 + AES-256-GCM blobs, sealed identities
//! ```

pub mod keystore;

pub use keystore::{iterations_for, EncryptedKeyBlob, SealedIdentity, VaultError};
