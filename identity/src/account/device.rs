//! Local identity and its device registry.
//!
//! One person, many physical tokens. A [`LocalIdentity`] holds a master
//! seed and a registry of devices; each device gets its own Ed25519 key,
//! derived from the master seed with HKDF and the device id as info:
//!
//! ```text
//! master seed ──HKDF(info = "kairos:device:<deviceId>")──▶ device seed ──▶ device keypair
//! ```
//!
//! Device private keys are never stored. They are reconstructed from the
//! master seed whenever a device signs and dropped immediately after.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::seed::IdentitySeed;
use super::uid::ChipUid;
use super::AccountError;
use crate::config::{DEVICE_DERIVATION_PATH_PREFIX, IDENTITY_KEY_PREFIX};
use crate::crypto::keys::{KairosKeypair, KairosPublicKey};
use crate::did::create_did_key;
use crate::store::{get_json, put_json, KeyValueStore};

/// Kind of physical or logical device bound to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    NfcChip,
    Phone,
    Browser,
    Kiosk,
    Wearable,
    Other,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::NfcChip => "nfc-chip",
            DeviceType::Phone => "phone",
            DeviceType::Browser => "browser",
            DeviceType::Kiosk => "kiosk",
            DeviceType::Wearable => "wearable",
            DeviceType::Other => "other",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nfc-chip" | "nfc" | "chip" => Ok(DeviceType::NfcChip),
            "phone" => Ok(DeviceType::Phone),
            "browser" => Ok(DeviceType::Browser),
            "kiosk" => Ok(DeviceType::Kiosk),
            "wearable" => Ok(DeviceType::Wearable),
            "other" => Ok(DeviceType::Other),
            other => Err(AccountError::InvalidDeviceType(other.to_string())),
        }
    }
}

/// A registered device. Public data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    /// Hex-encoded device public key.
    pub public_key: String,
    pub derivation_path: String,
    #[serde(rename = "chipUID", default, skip_serializing_if = "Option::is_none")]
    pub chip_uid: Option<ChipUid>,
    /// Unix milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

impl DeviceRecord {
    /// `did:key` of this device's public key.
    pub fn did(&self) -> Result<String, AccountError> {
        let pk = KairosPublicKey::from_hex(&self.public_key)?;
        Ok(create_did_key(pk.as_bytes()))
    }
}

/// The identity owned by this node: a master seed plus its devices.
///
/// Serializes to the local persisted layout
/// `{ masterSeed, userId, devices: { [deviceId]: DeviceRecord }, createdAt }`.
/// The master seed is plaintext in that form; use
/// [`seal`](Self::seal) before writing it anywhere shared.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    master_seed: IdentitySeed,
    pub user_id: String,
    pub devices: BTreeMap<String, DeviceRecord>,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl LocalIdentity {
    /// A new identity with a random master seed.
    pub fn generate() -> Result<Self, AccountError> {
        Ok(Self::from_seed(IdentitySeed::generate()?, Uuid::new_v4().to_string()))
    }

    /// An identity whose master seed is the chip-derived seed, so the chip
    /// alone (plus PIN) can rebuild it and every device key under it.
    pub fn from_chip(uid: &ChipUid, pin: Option<&str>) -> Result<Self, AccountError> {
        let seed = IdentitySeed::derive(uid, pin)?;
        let user_id = super::record::account_id_for(&seed.keypair().public_key());
        Ok(Self::from_seed(seed, user_id))
    }

    pub fn from_seed(master_seed: IdentitySeed, user_id: String) -> Self {
        Self {
            master_seed,
            user_id,
            devices: BTreeMap::new(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub(crate) fn master_seed(&self) -> &IdentitySeed {
        &self.master_seed
    }

    /// Public key of the master identity.
    pub fn master_public_key(&self) -> KairosPublicKey {
        self.master_seed.keypair().public_key()
    }

    /// `did:key` of the master identity.
    pub fn did(&self) -> String {
        create_did_key(self.master_public_key().as_bytes())
    }

    /// Register a new device and return its id.
    ///
    /// The device key is derived, its public half recorded, and the private
    /// half discarded.
    pub fn register_device(
        &mut self,
        device_name: &str,
        device_type: DeviceType,
        chip_uid: Option<ChipUid>,
    ) -> Result<String, AccountError> {
        let device_name = device_name.trim();
        if device_name.is_empty() {
            return Err(AccountError::InvalidDeviceName);
        }

        let device_id = Uuid::new_v4().to_string();
        let keypair = self.master_seed.derive_device_keypair(&device_id)?;

        let record = DeviceRecord {
            device_id: device_id.clone(),
            device_name: device_name.to_string(),
            device_type,
            public_key: keypair.public_key_hex(),
            derivation_path: format!("{DEVICE_DERIVATION_PATH_PREFIX}{device_id}"),
            chip_uid,
            created_at: Utc::now().timestamp_millis(),
            last_used: None,
        };

        info!(
            user_id = %self.user_id,
            device_id = %device_id,
            device_type = %device_type,
            "device registered"
        );
        self.devices.insert(device_id.clone(), record);
        Ok(device_id)
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }

    /// Remove a device. Its key can never be re-derived under a new
    /// registration since ids are random.
    pub fn remove_device(&mut self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.remove(device_id)
    }

    /// Rebuild a device's private key. Callers must drop it after use.
    pub(crate) fn device_keypair(&self, device_id: &str) -> Result<KairosKeypair, AccountError> {
        let record = self
            .devices
            .get(device_id)
            .ok_or_else(|| AccountError::DeviceNotFound(device_id.to_string()))?;
        let keypair = self.master_seed.derive_device_keypair(device_id)?;
        if !record.public_key.eq_ignore_ascii_case(&keypair.public_key_hex()) {
            // Registry edited by hand, or a seed swapped under it.
            return Err(AccountError::DeviceKeyMismatch(device_id.to_string()));
        }
        Ok(keypair)
    }

    /// Stamp `last_used` on a device.
    pub fn touch_device(&mut self, device_id: &str) {
        if let Some(record) = self.devices.get_mut(device_id) {
            record.last_used = Some(Utc::now().timestamp_millis());
        }
    }

    fn store_key(user_id: &str) -> String {
        format!("{IDENTITY_KEY_PREFIX}{user_id}")
    }

    /// Persist under `identity:<userId>`.
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), AccountError> {
        put_json(store, &Self::store_key(&self.user_id), self).await?;
        debug!(user_id = %self.user_id, devices = self.devices.len(), "local identity saved");
        Ok(())
    }

    pub async fn load(
        store: &dyn KeyValueStore,
        user_id: &str,
    ) -> Result<Option<Self>, AccountError> {
        Ok(get_json(store, &Self::store_key(user_id)).await?)
    }

    /// User ids of every identity in the store.
    pub async fn list_user_ids(store: &dyn KeyValueStore) -> Result<Vec<String>, AccountError> {
        Ok(store
            .keys_with_prefix(IDENTITY_KEY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(IDENTITY_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("user_id", &self.user_id)
            .field("devices", &self.devices.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
