//! # Storage Module
//!
//! Local-only persistence for account records, local identities and issued
//! challenges. There is no central database anywhere in the design; each
//! node (browser, kiosk, embedded verifier) keeps its own store.
//!
//! ## Architecture
//!
//! ```text
//! KeyValueStore (async trait: get / set / delete / keys_with_prefix)
//!   ├── MemoryStore  — DashMap, for tests and ephemeral nodes
//!   └── SledStore    — sled tree on disk, for the node binary
//! KeyedLock          — per-key async mutex serializing read-modify-write
//! ```
//!
//! Values are opaque bytes at this layer. [`get_json`] / [`put_json`] wrap
//! them in serde_json so records stay human-inspectable on disk and match
//! the JSON layout other KairOS components read.

pub mod lock;
pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use lock::{KeyedGuard, KeyedLock};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Errors from a storage backend.
///
/// Everything except `Serialization` is a resource failure: the store is
/// unavailable or refused the write, and a retry may succeed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("stored key is not valid UTF-8")]
    InvalidKey,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An async key-value store.
///
/// Implementations must be safe to share behind an `Arc` across tasks.
/// Atomicity across keys is not required; callers needing read-modify-write
/// on one key go through [`KeyedLock`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value for `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite the value for `key`.
    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Fetch and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes).await
}

#[cfg(test)]
pub(crate) mod testing {
    //! A store that fails every call, for exercising degrade paths.

    use super::*;

    pub struct UnavailableStore;

    #[async_trait]
    impl KeyValueStore for UnavailableStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn delete(&self, _key: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn keys_with_prefix(&self, _prefix: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }
}
