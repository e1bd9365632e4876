//! Crate-level error and its coarse taxonomy.
//!
//! Every module keeps its own error enum. [`KairosError`] wraps them all so
//! callers that only care about *what to do next* can ask for a
//! [`ErrorKind`]: fix the caller, retry later, tell the user nobody tapped,
//! or report a missing record.
//!
//! Verification failures never show up here. A bad signature, an expired
//! challenge or a wrong PIN is a verdict value, not an error.

use thiserror::Error;

use crate::account::{AccountError, SeedError, UidError};
use crate::auth::AuthError;
use crate::crypto::encryption::EncryptionError;
use crate::crypto::kdf::KdfError;
use crate::crypto::keys::KeyError;
use crate::crypto::random::RandomError;
use crate::did::DidError;
use crate::nfc::NfcError;
use crate::store::StoreError;
use crate::vault::VaultError;

/// What kind of failure an error is, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input shape. A caller bug; retrying will not help.
    InvalidInput,
    /// RNG or storage unavailable. Retry may succeed.
    Resource,
    /// A bounded wait ran out (no NFC tap).
    Timeout,
    /// A referenced record does not exist.
    NotFound,
}

#[derive(Debug, Error)]
pub enum KairosError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Random(#[from] RandomError),

    #[error(transparent)]
    Did(#[from] DidError),

    #[error(transparent)]
    Uid(#[from] UidError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Nfc(#[from] NfcError),
}

pub type KairosResult<T> = Result<T, KairosError>;

impl KairosError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KairosError::Key(_)
            | KairosError::Kdf(_)
            | KairosError::Did(_)
            | KairosError::Uid(_) => ErrorKind::InvalidInput,
            KairosError::Random(_) => ErrorKind::Resource,
            KairosError::Encryption(e) => encryption_kind(e),
            KairosError::Seed(e) => seed_kind(e),
            KairosError::Store(e) => store_kind(e),
            KairosError::Account(e) => account_kind(e),
            KairosError::Auth(e) => auth_kind(e),
            KairosError::Vault(e) => vault_kind(e),
            KairosError::Nfc(NfcError::Timeout(_)) => ErrorKind::Timeout,
            KairosError::Nfc(NfcError::Reader(_)) => ErrorKind::Resource,
        }
    }

    /// Shorthand for `kind() == ErrorKind::Resource`.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Resource
    }
}

fn encryption_kind(e: &EncryptionError) -> ErrorKind {
    match e {
        EncryptionError::Random(_) => ErrorKind::Resource,
        _ => ErrorKind::InvalidInput,
    }
}

fn seed_kind(e: &SeedError) -> ErrorKind {
    match e {
        SeedError::Random(_) => ErrorKind::Resource,
        _ => ErrorKind::InvalidInput,
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        // Corrupt JSON on disk: retrying reads the same bytes.
        StoreError::Serialization(_) | StoreError::InvalidKey => ErrorKind::InvalidInput,
        StoreError::Sled(_) | StoreError::Unavailable(_) => ErrorKind::Resource,
    }
}

fn account_kind(e: &AccountError) -> ErrorKind {
    match e {
        AccountError::Random(_) => ErrorKind::Resource,
        AccountError::Store(s) => store_kind(s),
        AccountError::Seed(s) => seed_kind(s),
        AccountError::NotFound(_) | AccountError::DeviceNotFound(_) => ErrorKind::NotFound,
        AccountError::Uid(_)
        | AccountError::Key(_)
        | AccountError::Kdf(_)
        | AccountError::DeviceKeyMismatch(_)
        | AccountError::InvalidDeviceName
        | AccountError::InvalidDeviceType(_) => ErrorKind::InvalidInput,
    }
}

fn auth_kind(e: &AuthError) -> ErrorKind {
    match e {
        AuthError::InvalidChallenge(_) => ErrorKind::InvalidInput,
        AuthError::Random(_) => ErrorKind::Resource,
        AuthError::Account(a) => account_kind(a),
        AuthError::Store(s) => store_kind(s),
    }
}

fn vault_kind(e: &VaultError) -> ErrorKind {
    match e {
        VaultError::Random(_) => ErrorKind::Resource,
        VaultError::Store(s) => store_kind(s),
        VaultError::Encryption(enc) => encryption_kind(enc),
        VaultError::Seed(s) => seed_kind(s),
        VaultError::UnsupportedVersion(_)
        | VaultError::InvalidSaltLength(_)
        | VaultError::EmptyPassphrase
        | VaultError::DecryptionFailed
        | VaultError::Kdf(_) => ErrorKind::InvalidInput,
    }
}
