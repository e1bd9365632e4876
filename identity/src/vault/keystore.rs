//! # Encrypted Key Store
//!
//! Secrets at rest are sealed into an [`EncryptedKeyBlob`]:
//!
//! ```text
//! key  = PBKDF2-HMAC-SHA256(passphrase, salt, iterations(version))
//! blob = { encrypted: AES-256-GCM(key, iv, secret, aad = version),
//!          iv: 12 bytes, salt: 16..=32 bytes, version: "v1" | "v2" }
//! ```
//!
//! Every blob names its format version explicitly. The version picks the
//! iteration count on decryption and is bound into the AEAD as associated
//! data, so relabelling a blob to a cheaper version makes it undecryptable
//! rather than weaker.
//!
//! | Version | PBKDF2 iterations | Written today |
//! |---------|-------------------|---------------|
//! | `v1`    | 100,000           | no            |
//! | `v2`    | 310,000           | yes           |
//!
//! Raising the cost means adding a version here. Old blobs keep opening;
//! [`EncryptedKeyBlob::needs_upgrade`] tells callers when to re-seal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::account::{DeviceRecord, IdentitySeed, LocalIdentity, SeedError};
use crate::config::{
    SEALED_IDENTITY_KEY_PREFIX, VAULT_CURRENT_FORMAT, VAULT_FORMAT_V1, VAULT_FORMAT_V2,
    VAULT_MAX_SALT_LENGTH, VAULT_MIN_SALT_LENGTH, VAULT_SALT_LENGTH, VAULT_V1_ITERATIONS,
    VAULT_V2_ITERATIONS,
};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad, EncryptionError};
use crate::crypto::kdf::{pbkdf2_sha256, KdfError};
use crate::crypto::random::{generate_secure_random, RandomError};
use crate::store::{get_json, put_json, KeyValueStore, StoreError};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("unsupported vault format version: {0}")]
    UnsupportedVersion(String),

    #[error("vault salt must be {VAULT_MIN_SALT_LENGTH}-{VAULT_MAX_SALT_LENGTH} bytes, got {0}")]
    InvalidSaltLength(usize),

    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    /// Wrong passphrase or a corrupted blob. The two are indistinguishable.
    #[error("vault decryption failed: wrong passphrase or corrupted blob")]
    DecryptionFailed,

    #[error(transparent)]
    Encryption(EncryptionError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Random(#[from] RandomError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<EncryptionError> for VaultError {
    fn from(e: EncryptionError) -> Self {
        match e {
            EncryptionError::DecryptFailed => VaultError::DecryptionFailed,
            EncryptionError::Random(r) => VaultError::Random(r),
            other => VaultError::Encryption(other),
        }
    }
}

/// PBKDF2 iteration count for a format version.
pub fn iterations_for(version: &str) -> Result<u32, VaultError> {
    match version {
        VAULT_FORMAT_V1 => Ok(VAULT_V1_ITERATIONS),
        VAULT_FORMAT_V2 => Ok(VAULT_V2_ITERATIONS),
        other => Err(VaultError::UnsupportedVersion(other.to_string())),
    }
}

/// A passphrase-sealed secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyBlob {
    /// Ciphertext with the 16-byte GCM tag appended.
    pub encrypted: Vec<u8>,
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub version: String,
}

impl EncryptedKeyBlob {
    /// Seal with the current format.
    pub fn seal(secret: &[u8], passphrase: &str) -> Result<Self, VaultError> {
        Self::seal_with_version(secret, passphrase, VAULT_CURRENT_FORMAT)
    }

    pub fn seal_with_version(
        secret: &[u8],
        passphrase: &str,
        version: &str,
    ) -> Result<Self, VaultError> {
        if passphrase.is_empty() {
            return Err(VaultError::EmptyPassphrase);
        }
        let iterations = iterations_for(version)?;
        let salt = generate_secure_random(VAULT_SALT_LENGTH)?;
        let key = pbkdf2_sha256(passphrase.as_bytes(), &salt, iterations)?;
        let (iv, encrypted) = encrypt_with_aad(&key, secret, version.as_bytes())?;

        debug!(version, iterations, "secret sealed");
        Ok(Self {
            encrypted,
            iv: iv.to_vec(),
            salt,
            version: version.to_string(),
        })
    }

    /// Decrypt. The plaintext is wiped when the returned buffer drops.
    pub fn open(&self, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let iterations = iterations_for(&self.version)?;
        if !(VAULT_MIN_SALT_LENGTH..=VAULT_MAX_SALT_LENGTH).contains(&self.salt.len()) {
            return Err(VaultError::InvalidSaltLength(self.salt.len()));
        }
        let key = pbkdf2_sha256(passphrase.as_bytes(), &self.salt, iterations)?;
        let plaintext = decrypt_with_aad(&key, &self.iv, &self.encrypted, self.version.as_bytes())?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Whether this blob was written with an older format.
    pub fn needs_upgrade(&self) -> bool {
        self.version != VAULT_CURRENT_FORMAT
    }

    /// Re-seal under the current format. Fresh salt and IV.
    pub fn upgrade(&self, passphrase: &str) -> Result<Self, VaultError> {
        let secret = self.open(passphrase)?;
        let upgraded = Self::seal(&secret, passphrase)?;
        info!(from = %self.version, to = VAULT_CURRENT_FORMAT, "vault blob upgraded");
        Ok(upgraded)
    }
}

// ---------------------------------------------------------------------------
// Sealed local identities
// ---------------------------------------------------------------------------

/// A [`LocalIdentity`] with its master seed sealed. Safe to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedIdentity {
    pub user_id: String,
    pub devices: BTreeMap<String, DeviceRecord>,
    pub created_at: i64,
    pub master_seed: EncryptedKeyBlob,
}

impl LocalIdentity {
    /// Seal with the current vault format.
    pub fn seal(&self, passphrase: &str) -> Result<SealedIdentity, VaultError> {
        self.seal_with_version(passphrase, VAULT_CURRENT_FORMAT)
    }

    pub fn seal_with_version(
        &self,
        passphrase: &str,
        version: &str,
    ) -> Result<SealedIdentity, VaultError> {
        Ok(SealedIdentity {
            user_id: self.user_id.clone(),
            devices: self.devices.clone(),
            created_at: self.created_at,
            master_seed: EncryptedKeyBlob::seal_with_version(
                self.master_seed().as_bytes(),
                passphrase,
                version,
            )?,
        })
    }
}

impl SealedIdentity {
    pub fn unseal(&self, passphrase: &str) -> Result<LocalIdentity, VaultError> {
        let secret = self.master_seed.open(passphrase)?;
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;
        let mut identity = LocalIdentity::from_seed(IdentitySeed::from_bytes(bytes), self.user_id.clone());
        identity.devices = self.devices.clone();
        identity.created_at = self.created_at;
        Ok(identity)
    }

    fn store_key(user_id: &str) -> String {
        format!("{SEALED_IDENTITY_KEY_PREFIX}{user_id}")
    }

    /// Persist under `sealed:<userId>`.
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), VaultError> {
        put_json(store, &Self::store_key(&self.user_id), self).await?;
        Ok(())
    }

    pub async fn load(
        store: &dyn KeyValueStore,
        user_id: &str,
    ) -> Result<Option<Self>, VaultError> {
        Ok(get_json(store, &Self::store_key(user_id)).await?)
    }

    /// User ids of every sealed identity in the store.
    pub async fn list_user_ids(store: &dyn KeyValueStore) -> Result<Vec<String>, VaultError> {
        Ok(store
            .keys_with_prefix(SEALED_IDENTITY_KEY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(SEALED_IDENTITY_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DeviceType;
    use crate::config::{AES_NONCE_LENGTH, AES_TAG_LENGTH};
    use crate::store::MemoryStore;

    const SECRET: &[u8] = b"thirty-two bytes of master seed!";

    #[test]
    fn seal_open_current_format() {
        let blob = EncryptedKeyBlob::seal(SECRET, "correct horse").unwrap();
        assert_eq!(blob.version, "v2");
        assert_eq!(blob.iv.len(), AES_NONCE_LENGTH);
        assert_eq!(blob.salt.len(), 32);
        assert_eq!(blob.encrypted.len(), SECRET.len() + AES_TAG_LENGTH);
        assert!(!blob.needs_upgrade());
        assert_eq!(&blob.open("correct horse").unwrap()[..], SECRET);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let blob = EncryptedKeyBlob::seal_with_version(SECRET, "right", "v1").unwrap();
        assert!(matches!(blob.open("wrong"), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn old_version_still_opens_and_upgrades() {
        let v1 = EncryptedKeyBlob::seal_with_version(SECRET, "pass", "v1").unwrap();
        assert!(v1.needs_upgrade());
        assert_eq!(&v1.open("pass").unwrap()[..], SECRET);

        let v2 = v1.upgrade("pass").unwrap();
        assert_eq!(v2.version, "v2");
        assert_ne!(v2.salt, v1.salt);
        assert_eq!(&v2.open("pass").unwrap()[..], SECRET);
    }

    #[test]
    fn relabelled_version_does_not_decrypt() {
        let mut blob = EncryptedKeyBlob::seal(SECRET, "pass").unwrap();
        blob.version = "v1".into();
        assert!(matches!(blob.open("pass"), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn unknown_version_rejected() {
        assert!(matches!(
            EncryptedKeyBlob::seal_with_version(SECRET, "pass", "v9"),
            Err(VaultError::UnsupportedVersion(_))
        ));
        let mut blob = EncryptedKeyBlob::seal_with_version(SECRET, "pass", "v1").unwrap();
        blob.version = String::new();
        assert!(matches!(blob.open("pass"), Err(VaultError::UnsupportedVersion(_))));
    }

    #[test]
    fn malformed_blob_fields() {
        let blob = EncryptedKeyBlob::seal_with_version(SECRET, "pass", "v1").unwrap();

        let mut short_salt = blob.clone();
        short_salt.salt.truncate(8);
        assert!(matches!(
            short_salt.open("pass"),
            Err(VaultError::InvalidSaltLength(8))
        ));

        let mut bad_iv = blob.clone();
        bad_iv.iv.pop();
        assert!(matches!(bad_iv.open("pass"), Err(VaultError::Encryption(_))));

        let mut flipped = blob;
        flipped.encrypted[0] ^= 1;
        assert!(matches!(flipped.open("pass"), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn empty_passphrase_rejected() {
        assert!(matches!(
            EncryptedKeyBlob::seal(SECRET, ""),
            Err(VaultError::EmptyPassphrase)
        ));
    }

    #[tokio::test]
    async fn sealed_identity_roundtrip() {
        let mut identity = LocalIdentity::generate().unwrap();
        let device = identity
            .register_device("Phone", DeviceType::Phone, None)
            .unwrap();

        let sealed = identity.seal_with_version("hunter22", "v1").unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        assert!(!json.contains(&*identity.master_seed().to_hex()));

        let store = MemoryStore::new();
        sealed.save(&store).await.unwrap();
        assert_eq!(
            SealedIdentity::list_user_ids(&store).await.unwrap(),
            vec![identity.user_id.clone()]
        );

        let loaded = SealedIdentity::load(&store, &identity.user_id)
            .await
            .unwrap()
            .unwrap();
        let restored = loaded.unseal("hunter22").unwrap();
        assert_eq!(restored, identity);
        assert_eq!(restored.did(), identity.did());
        assert!(restored.device(&device).is_some());

        assert!(loaded.unseal("hunter2").is_err());
    }
}
