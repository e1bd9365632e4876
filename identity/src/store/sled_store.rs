//! # SledStore — On-Disk Persistence
//!
//! The persistent [`KeyValueStore`] used by the node binary, built on sled's
//! embedded key-value store. Everything lives in one named tree:
//!
//! | Key prefix    | Value                        |
//! |---------------|------------------------------|
//! | `account:`    | JSON `AccountRecord`         |
//! | `identity:`   | JSON `LocalIdentity`         |
//! | `sealed:`     | JSON `SealedIdentity`        |
//! | `challenge:`  | JSON issued `Challenge`      |
//!
//! Writes are flushed before `set`/`delete` return. Losing an increment of
//! `verificationCount` to a crash is exactly the kind of lost update the
//! account layer goes out of its way to prevent.

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;

use super::{KeyValueStore, StoreError, StoreResult};

/// Name of the sled tree holding all identity-engine records.
const TREE_NAME: &str = "kairos";

/// sled-backed store.
///
/// `Clone` is cheap; sled handles are reference counted and safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct SledStore {
    // Held so the database outlives every tree handle.
    _db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Temporary database removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { _db: db, tree })
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let existed = self.tree.remove(key.as_bytes())?.is_some();
        self.tree.flush_async().await?;
        Ok(existed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.tree
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|k| {
                let k = k?;
                String::from_utf8(k.to_vec()).map_err(|_| StoreError::InvalidKey)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = SledStore::open_temporary().unwrap();
        store.set("account:04:A1", b"{}".to_vec()).await.unwrap();
        assert_eq!(
            store.get("account:04:A1").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(store.delete("account:04:A1").await.unwrap());
        assert_eq!(store.get("account:04:A1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_scan() {
        let store = SledStore::open_temporary().unwrap();
        for key in ["challenge:b", "account:x", "challenge:a"] {
            store.set(key, vec![0]).await.unwrap();
        }
        assert_eq!(
            store.keys_with_prefix("challenge:").await.unwrap(),
            vec!["challenge:a", "challenge:b"]
        );
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.set("identity:u1", b"seed".to_vec()).await.unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get("identity:u1").await.unwrap(),
            Some(b"seed".to_vec())
        );
    }
}
