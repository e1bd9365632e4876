// Copyright (c) 2026 KairOS Contributors. MIT License.
// See LICENSE for details.

//! # KairOS Identity — Core Library
//!
//! A self-contained decentralized identity engine for NFC chips. Tap a
//! chip, get the same Ed25519 identity back every time, on any machine,
//! with no central database.
//!
//! ```text
//! chip UID (+ PIN) → seed → keypair → did:key / accountId
//!                                   → signed challenge → verified assertion
//! ```
//!
//! ## Layers
//!
//! Each layer depends only on the ones above it in this list:
//!
//! - **crypto** — Ed25519, HKDF, PBKDF2, AES-256-GCM, OsRng, constant-time compare.
//! - **did** — `did:key` construction and parsing (multicodec `0xed01`, base58btc).
//! - **account** — chip UID → deterministic identity, account and device registries.
//! - **auth** — time-bound challenges, local signing, remote verification.
//!
//! Supporting modules:
//!
//! - **store** — async key-value abstraction over memory and sled.
//! - **vault** — versioned passphrase encryption for master seeds.
//! - **nfc** — tap listening with polling, debounce and timeout.
//! - **config** — constants and runtime knobs.
//! - **error** — crate-wide error taxonomy.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kairos_identity::auth::TapAuthenticator;
//! use kairos_identity::config::EngineConfig;
//! use kairos_identity::store::MemoryStore;
//!
//! # async fn run() -> Result<(), kairos_identity::error::KairosError> {
//! let auth = TapAuthenticator::from_store(Arc::new(MemoryStore::new()), EngineConfig::default());
//! let outcome = auth.authenticate_tap("04:A1:B2:C3:D4:E5:F6", Some("1234")).await?;
//! println!("{} verified={}", outcome.account().did, outcome.is_verified());
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod did;
pub mod error;
pub mod nfc;
pub mod store;
pub mod vault;

pub use error::{ErrorKind, KairosError, KairosResult};
