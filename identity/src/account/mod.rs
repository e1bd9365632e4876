//! # Deterministic Account Derivation
//!
//! Turns an ephemeral physical tap into a stable digital identity.
//!
//! ```text
//! UID_READ → SEED_DERIVED → KEYPAIR_DERIVED → ACCOUNT_LOOKUP
//!          → { ACCOUNT_FOUND | ACCOUNT_CREATED } → VERIFIED
//! ```
//!
//! - [`uid`]: chip UID parsing and canonical form.
//! - [`seed`]: `(chipUID, pin)` → 32-byte seed, PIN-less or PIN-protected.
//! - [`record`]: the per-chip account record and its public summary.
//! - [`manager`]: lookup / create / bump, serialized per chip UID.
//! - [`device`]: a local identity's device registry and sub-key derivation.

pub mod device;
pub mod manager;
pub mod record;
pub mod seed;
pub mod uid;

pub use device::{DeviceRecord, DeviceType, LocalIdentity};
pub use manager::{AccountManager, AccountStatus, DerivedAccount};
pub use record::{account_id_for, AccountRecord, AccountSummary};
pub use seed::{normalize_pin, IdentitySeed, SeedError};
pub use uid::{ChipUid, UidError};

use thiserror::Error;

use crate::crypto::kdf::KdfError;
use crate::crypto::keys::KeyError;
use crate::crypto::random::RandomError;
use crate::store::StoreError;

/// Errors from the account layer.
///
/// A PIN mismatch is not in here. It shows up as
/// [`AccountStatus::KeyMismatch`] on an otherwise successful derivation.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Uid(#[from] UidError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Random(#[from] RandomError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("no account for chip {0}")]
    NotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device {0} public key does not match its derived key")]
    DeviceKeyMismatch(String),

    #[error("device name must not be empty")]
    InvalidDeviceName,

    #[error("unknown device type: {0}")]
    InvalidDeviceType(String),
}
