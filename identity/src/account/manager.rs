//! # Account Manager
//!
//! Maps chip taps onto persisted account records.
//!
//! ## Lookup, not re-derivation
//!
//! Whether a chip is "known" is decided by looking up its record by UID,
//! never by re-deriving and comparing DIDs. That keeps the door open for
//! re-keying a chip later, and it is what lets a wrong PIN surface as a
//! [`AccountStatus::KeyMismatch`] instead of a silent second account.
//!
//! ## Concurrency
//!
//! Derivation itself is pure, so racing taps of one chip agree on the key.
//! The record update is a read-modify-write, so it runs under a per-UID
//! [`KeyedLock`]. Two taps within the same millisecond bump
//! `verificationCount` twice, never once.
//!
//! ## Storage failures
//!
//! If the store cannot be read during a derivation, the caller still gets
//! the freshly derived identity, with [`AccountStatus::Unconfirmed`] and
//! `persisted: false`. A failed write after a successful read keeps the
//! status and clears `persisted`.
//! Admin operations (`get_account`, `list_accounts`, `reset_account`,
//! `check_pin`) surface storage errors instead.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::record::{account_id_for, AccountRecord};
use super::seed::{normalize_pin, IdentitySeed};
use super::uid::ChipUid;
use super::AccountError;
use crate::config::{EngineConfig, ACCOUNT_KEY_PREFIX, PIN_SALT_LENGTH, PIN_VERIFIER_ITERATIONS};
use crate::crypto::kdf::pbkdf2_sha256;
use crate::crypto::keys::{KairosKeypair, KairosPublicKey};
use crate::crypto::random::{constant_time_eq, random_array};
use crate::did::create_did_key;
use crate::store::{get_json, put_json, KeyValueStore, KeyedLock};

/// What a derivation found in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountStatus {
    /// First tap of this chip; a record was created.
    Created,
    /// Known chip, derived key matches the record; counter bumped.
    Returning,
    /// Known chip, but the derived key differs from the recorded one.
    /// Usually a wrong PIN. The record is left untouched.
    KeyMismatch,
    /// The registry could not be read. The record is freshly derived and
    /// unsaved, so nothing is known about whether the chip was seen before.
    Unconfirmed,
}

/// Result of [`AccountManager::derive_account`].
#[derive(Debug, Clone)]
pub struct DerivedAccount {
    /// The record as stored after this call. For `KeyMismatch` this is the
    /// previously recorded account, not the derived one.
    pub record: AccountRecord,
    pub status: AccountStatus,
    /// Whether `record` is known to be in the store.
    pub persisted: bool,
    keypair: KairosKeypair,
}

impl DerivedAccount {
    /// The keypair derived from this tap. Stays on this device.
    pub fn keypair(&self) -> &KairosKeypair {
        &self.keypair
    }

    pub fn derived_public_key(&self) -> KairosPublicKey {
        self.keypair.public_key()
    }

    /// `did:key` of the derived key, which differs from `record.did` only
    /// on `KeyMismatch`.
    pub fn derived_did(&self) -> String {
        create_did_key(&self.keypair.public_key_bytes())
    }
}

/// Chip account registry over any [`KeyValueStore`].
pub struct AccountManager {
    store: Arc<dyn KeyValueStore>,
    locks: KeyedLock,
    config: EngineConfig,
}

impl AccountManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: EngineConfig) -> Self {
        Self {
            store,
            locks: KeyedLock::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Derive the identity for a tap and update its account record.
    ///
    /// Fails only on malformed input (bad UID, bad PIN shape) or an
    /// unavailable RNG. See the module docs for storage failures.
    pub async fn derive_account(
        &self,
        chip_uid: &str,
        pin: Option<&str>,
    ) -> Result<DerivedAccount, AccountError> {
        let uid = ChipUid::parse(chip_uid)?;
        self.derive_for_uid(&uid, pin).await
    }

    /// [`derive_account`](Self::derive_account) for an already parsed UID.
    pub async fn derive_for_uid(
        &self,
        uid: &ChipUid,
        pin: Option<&str>,
    ) -> Result<DerivedAccount, AccountError> {
        self.resolve(uid, pin, true).await
    }

    /// Like [`derive_account`](Self::derive_account), but a returning chip's
    /// counter is left alone. Pair with
    /// [`record_verified_tap`](Self::record_verified_tap) once the tap's
    /// signature has been checked.
    pub async fn lookup_account(
        &self,
        chip_uid: &str,
        pin: Option<&str>,
    ) -> Result<DerivedAccount, AccountError> {
        let uid = ChipUid::parse(chip_uid)?;
        self.resolve(&uid, pin, false).await
    }

    /// Bump `verificationCount` and `lastSeen` after a verified tap.
    ///
    /// Returns `None` if the record vanished or was re-keyed since lookup.
    pub async fn record_verified_tap(
        &self,
        uid: &ChipUid,
        public_key: &KairosPublicKey,
    ) -> Result<Option<AccountRecord>, AccountError> {
        let key = account_key(uid);
        let _guard = self.locks.lock(uid.as_str()).await;

        let Some(mut record) = get_json::<AccountRecord>(self.store.as_ref(), &key).await? else {
            return Ok(None);
        };
        if !record.matches_key(public_key) {
            return Ok(None);
        }
        bump(&mut record);
        put_json(self.store.as_ref(), &key, &record).await?;
        debug!(chip_uid = %uid, verification_count = record.verification_count, "verified tap recorded");
        Ok(Some(record))
    }

    /// Chips with a derivation or tap in flight.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn resolve(
        &self,
        uid: &ChipUid,
        pin: Option<&str>,
        bump_returning: bool,
    ) -> Result<DerivedAccount, AccountError> {
        let pin = normalize_pin(pin)?;
        let keypair = IdentitySeed::derive(uid, pin)?.keypair();
        let public_key = keypair.public_key();
        let key = account_key(uid);

        let _guard = self.locks.lock(uid.as_str()).await;

        let existing: Option<AccountRecord> = match get_json(self.store.as_ref(), &key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(chip_uid = %uid, error = %e, "account lookup failed, returning unpersisted identity");
                let record = self.new_record(uid, &public_key, pin)?;
                return Ok(DerivedAccount {
                    record,
                    status: AccountStatus::Unconfirmed,
                    persisted: false,
                    keypair,
                });
            }
        };

        match existing {
            Some(mut record) if record.matches_key(&public_key) => {
                let persisted = if bump_returning {
                    bump(&mut record);
                    self.persist(&key, &record).await
                } else {
                    true
                };
                info!(
                    chip_uid = %uid,
                    account_id = %record.account_id,
                    verification_count = record.verification_count,
                    "returning account found"
                );
                Ok(DerivedAccount {
                    record,
                    status: AccountStatus::Returning,
                    persisted,
                    keypair,
                })
            }
            Some(record) => {
                warn!(
                    chip_uid = %uid,
                    account_id = %record.account_id,
                    derived_account_id = %account_id_for(&public_key),
                    "derived key does not match recorded key"
                );
                Ok(DerivedAccount {
                    record,
                    status: AccountStatus::KeyMismatch,
                    persisted: true,
                    keypair,
                })
            }
            None => {
                let record = self.new_record(uid, &public_key, pin)?;
                let persisted = self.persist(&key, &record).await;
                info!(
                    chip_uid = %uid,
                    account_id = %record.account_id,
                    did = %record.did,
                    has_pin = record.has_pin,
                    "account created"
                );
                Ok(DerivedAccount {
                    record,
                    status: AccountStatus::Created,
                    persisted,
                    keypair,
                })
            }
        }
    }

    /// Look up the record for a chip.
    pub async fn get_account(&self, chip_uid: &str) -> Result<Option<AccountRecord>, AccountError> {
        let uid = ChipUid::parse(chip_uid)?;
        Ok(get_json(self.store.as_ref(), &account_key(&uid)).await?)
    }

    /// Every account in the store, ordered by chip UID.
    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>, AccountError> {
        let keys = self.store.keys_with_prefix(ACCOUNT_KEY_PREFIX).await?;
        let mut accounts = Vec::with_capacity(keys.len());
        for key in keys {
            // A concurrent reset may remove a key between scan and read.
            if let Some(record) = get_json::<AccountRecord>(self.store.as_ref(), &key).await? {
                accounts.push(record);
            }
        }
        Ok(accounts)
    }

    /// Explicit admin reset. Returns whether a record existed.
    pub async fn reset_account(&self, chip_uid: &str) -> Result<bool, AccountError> {
        let uid = ChipUid::parse(chip_uid)?;
        let _guard = self.locks.lock(uid.as_str()).await;
        let existed = self.store.delete(&account_key(&uid)).await?;
        if existed {
            info!(chip_uid = %uid, "account reset");
        }
        Ok(existed)
    }

    /// Explicitly answer "is this the PIN this chip was registered with?".
    ///
    /// Uses the stored PBKDF2 verifier when there is one, otherwise
    /// re-derives the key and compares it with the recorded public key.
    /// Never touches `verificationCount`.
    pub async fn check_pin(&self, chip_uid: &str, pin: Option<&str>) -> Result<bool, AccountError> {
        let uid = ChipUid::parse(chip_uid)?;
        let pin = normalize_pin(pin)?;
        let record: AccountRecord = get_json(self.store.as_ref(), &account_key(&uid))
            .await?
            .ok_or_else(|| AccountError::NotFound(uid.to_string()))?;

        if record.has_pin != pin.is_some() {
            return Ok(false);
        }

        if let (Some(pin), Some(verifier), Some(salt)) =
            (pin, record.encrypted_pin.as_deref(), record.pin_salt.as_deref())
        {
            if let (Ok(verifier), Ok(salt)) = (hex::decode(verifier), hex::decode(salt)) {
                let candidate = pbkdf2_sha256(pin.as_bytes(), &salt, PIN_VERIFIER_ITERATIONS)?;
                return Ok(constant_time_eq(&candidate[..], &verifier));
            }
            debug!(chip_uid = %uid, "stored PIN verifier unreadable, falling back to key comparison");
        }

        let derived = IdentitySeed::derive(&uid, pin)?.keypair().public_key();
        Ok(record.matches_key(&derived))
    }

    fn new_record(
        &self,
        uid: &ChipUid,
        public_key: &KairosPublicKey,
        pin: Option<&str>,
    ) -> Result<AccountRecord, AccountError> {
        let (encrypted_pin, pin_salt) = match pin {
            Some(pin) if self.config.persist_pin_verifier => {
                let salt = random_array::<PIN_SALT_LENGTH>()?;
                let verifier = pbkdf2_sha256(pin.as_bytes(), &salt, PIN_VERIFIER_ITERATIONS)?;
                (Some(hex::encode(&verifier[..])), Some(hex::encode(salt)))
            }
            _ => (None, None),
        };

        Ok(AccountRecord {
            chip_uid: uid.clone(),
            did: create_did_key(public_key.as_bytes()),
            account_id: account_id_for(public_key),
            public_key: public_key.to_hex(),
            created_at: Utc::now(),
            verification_count: 1,
            has_pin: pin.is_some(),
            encrypted_pin,
            pin_salt,
            last_seen: None,
        })
    }

    async fn persist(&self, key: &str, record: &AccountRecord) -> bool {
        match put_json(self.store.as_ref(), key, record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "account write failed, record not persisted");
                false
            }
        }
    }
}

fn bump(record: &mut AccountRecord) {
    record.verification_count = record.verification_count.saturating_add(1);
    record.last_seen = Some(Utc::now());
}

fn account_key(uid: &ChipUid) -> String {
    format!("{ACCOUNT_KEY_PREFIX}{uid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::UnavailableStore;
    use crate::store::MemoryStore;

    const CHIP: &str = "04:A1:B2:C3:D4:E5:F6";

    fn manager() -> AccountManager {
        AccountManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn first_tap_creates_account() {
        let mgr = manager();
        let acct = mgr.derive_account(CHIP, Some("1234")).await.unwrap();
        assert_eq!(acct.status, AccountStatus::Created);
        assert!(acct.persisted);
        assert_eq!(acct.record.verification_count, 1);
        assert!(acct.record.has_pin);
        assert!(acct.record.did.starts_with("did:key:z6Mk"));
        assert!(acct.record.account_id.starts_with("kairos_"));
        assert_eq!(acct.record.did, acct.derived_did());
        assert!(acct.record.encrypted_pin.is_none());
    }

    #[tokio::test]
    async fn returning_tap_bumps_counter() {
        let mgr = manager();
        let first = mgr.derive_account(CHIP, None).await.unwrap();
        let second = mgr.derive_account("04a1b2c3d4e5f6", None).await.unwrap();
        assert_eq!(second.status, AccountStatus::Returning);
        assert_eq!(second.record.verification_count, 2);
        assert_eq!(second.record.did, first.record.did);
        assert_eq!(second.record.created_at, first.record.created_at);
        assert!(second.record.last_seen.is_some());
        assert_eq!(
            second.keypair().public_key_bytes(),
            first.keypair().public_key_bytes()
        );
    }

    #[tokio::test]
    async fn wrong_pin_is_key_mismatch() {
        let mgr = manager();
        let original = mgr.derive_account(CHIP, Some("1234")).await.unwrap();
        let wrong = mgr.derive_account(CHIP, Some("5678")).await.unwrap();
        assert_eq!(wrong.status, AccountStatus::KeyMismatch);
        assert_eq!(wrong.record.did, original.record.did);
        assert_ne!(wrong.derived_did(), original.record.did);

        let stored = mgr.get_account(CHIP).await.unwrap().unwrap();
        assert_eq!(stored.verification_count, 1);
    }

    #[tokio::test]
    async fn malformed_input_is_error() {
        let mgr = manager();
        assert!(matches!(
            mgr.derive_account("", None).await,
            Err(AccountError::Uid(_))
        ));
        assert!(matches!(
            mgr.derive_account("not-a-uid", None).await,
            Err(AccountError::Uid(_))
        ));
        assert!(matches!(
            mgr.derive_account(CHIP, Some("12")).await,
            Err(AccountError::Seed(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_unpersisted_identity() {
        let mgr = AccountManager::new(Arc::new(UnavailableStore));
        let acct = mgr.derive_account(CHIP, None).await.unwrap();
        assert!(!acct.persisted);
        assert_eq!(acct.status, AccountStatus::Unconfirmed);

        let healthy = manager().derive_account(CHIP, None).await.unwrap();
        assert_eq!(acct.record.did, healthy.record.did);

        assert!(matches!(
            mgr.get_account(CHIP).await,
            Err(AccountError::Store(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_taps_never_lose_updates() {
        let mgr = Arc::new(manager());
        mgr.derive_account(CHIP, None).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move { mgr.derive_account(CHIP, None).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let rec = mgr.get_account(CHIP).await.unwrap().unwrap();
        assert_eq!(rec.verification_count, 21);
    }

    #[tokio::test]
    async fn list_and_reset() {
        let mgr = manager();
        mgr.derive_account("04:00:00:01", None).await.unwrap();
        mgr.derive_account("04:00:00:02", None).await.unwrap();

        let all = mgr.list_accounts().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].chip_uid.as_str(), "04:00:00:01");

        assert!(mgr.reset_account("04:00:00:01").await.unwrap());
        assert!(!mgr.reset_account("04:00:00:01").await.unwrap());
        assert_eq!(mgr.list_accounts().await.unwrap().len(), 1);

        let again = mgr.derive_account("04:00:00:01", None).await.unwrap();
        assert_eq!(again.status, AccountStatus::Created);
        assert_eq!(again.record.verification_count, 1);
    }

    #[tokio::test]
    async fn check_pin_without_verifier() {
        let mgr = manager();
        mgr.derive_account(CHIP, Some("1234")).await.unwrap();
        assert!(mgr.check_pin(CHIP, Some("1234")).await.unwrap());
        assert!(!mgr.check_pin(CHIP, Some("5678")).await.unwrap());
        assert!(!mgr.check_pin(CHIP, None).await.unwrap());
        assert!(matches!(
            mgr.check_pin("04:00:00:09", Some("1234")).await,
            Err(AccountError::NotFound(_))
        ));

        let rec = mgr.get_account(CHIP).await.unwrap().unwrap();
        assert_eq!(rec.verification_count, 1);
    }

    #[tokio::test]
    async fn check_pin_with_stored_verifier() {
        let config = EngineConfig {
            persist_pin_verifier: true,
            ..EngineConfig::default()
        };
        let mgr = AccountManager::with_config(Arc::new(MemoryStore::new()), config);
        let acct = mgr.derive_account(CHIP, Some("2468")).await.unwrap();
        assert!(acct.record.encrypted_pin.is_some());
        assert_eq!(acct.record.pin_salt.as_ref().map(|s| s.len()), Some(32));

        assert!(mgr.check_pin(CHIP, Some("2468")).await.unwrap());
        assert!(!mgr.check_pin(CHIP, Some("1357")).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_leaves_counter_until_verified() {
        let mgr = manager();
        mgr.derive_account(CHIP, None).await.unwrap();

        let found = mgr.lookup_account(CHIP, None).await.unwrap();
        assert_eq!(found.status, AccountStatus::Returning);
        assert_eq!(found.record.verification_count, 1);
        assert_eq!(mgr.get_account(CHIP).await.unwrap().unwrap().verification_count, 1);

        let bumped = mgr
            .record_verified_tap(&found.record.chip_uid, &found.derived_public_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bumped.verification_count, 2);
        assert!(bumped.last_seen.is_some());
    }

    #[tokio::test]
    async fn record_verified_tap_ignores_foreign_key() {
        let mgr = manager();
        let acct = mgr.derive_account(CHIP, Some("1234")).await.unwrap();
        let other = KairosKeypair::from_seed(&[9u8; 32]).public_key();
        assert!(mgr
            .record_verified_tap(&acct.record.chip_uid, &other)
            .await
            .unwrap()
            .is_none());
        let missing = ChipUid::parse("04:00:00:09").unwrap();
        assert!(mgr
            .record_verified_tap(&missing, &acct.derived_public_key())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lock_map_drains_after_distinct_taps() {
        let mgr = manager();
        for i in 0..500u32 {
            let uid = format!("04:{:02X}:{:02X}:00", i / 256, i % 256);
            mgr.derive_account(&uid, None).await.unwrap();
        }
        assert_eq!(mgr.list_accounts().await.unwrap().len(), 500);
        assert_eq!(mgr.active_locks(), 0);
    }
}
