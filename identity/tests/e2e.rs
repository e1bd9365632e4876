//! End-to-end integration tests for the KairOS identity engine.
//!
//! These tests drive the public API the way an integrator would: a chip is
//! tapped, an identity is derived, a challenge is issued by a verifier,
//! signed on the owning device, and checked remotely with nothing but the
//! public key.
//!
//! Each test builds its own stores. No shared state between tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kairos_identity::account::{AccountManager, AccountStatus, ChipUid, DeviceType, LocalIdentity};
use kairos_identity::auth::{
    sign_challenge, verify_challenge, verify_signed, Challenge, ChallengeIssuer, ChallengeVerdict,
    DeviceSigner, TapAuthenticator, TapOutcome,
};
use kairos_identity::config::EngineConfig;
use kairos_identity::did::{decode_base58btc, DidKey};
use kairos_identity::store::{KeyValueStore, MemoryStore, StoreError, StoreResult};
use kairos_identity::{ErrorKind, KairosError};

const CHIP: &str = "04:A1:B2:C3:D4:E5:F6";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn fresh_manager() -> AccountManager {
    AccountManager::new(Arc::new(MemoryStore::new()))
}

fn fresh_issuer() -> ChallengeIssuer {
    ChallengeIssuer::new(Arc::new(MemoryStore::new()), Duration::from_secs(300))
}

// ---------------------------------------------------------------------------
// Scenario: chip 04:A1:B2:C3:D4:E5:F6, PIN 1234
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chip_identity_is_stable_across_independent_runs() {
    // Two managers over two stores stand in for two fresh processes.
    let run1 = fresh_manager().derive_account(CHIP, Some("1234")).await.unwrap();
    let run2 = fresh_manager().derive_account(CHIP, Some("1234")).await.unwrap();

    assert_eq!(run1.status, AccountStatus::Created);
    assert_eq!(run2.status, AccountStatus::Created);
    assert_eq!(run1.record.did, run2.record.did);
    assert_eq!(run1.record.account_id, run2.record.account_id);
    assert_eq!(run1.record.public_key, run2.record.public_key);
    assert_eq!(
        run1.keypair().public_key_bytes(),
        run2.keypair().public_key_bytes()
    );
}

#[tokio::test]
async fn did_embeds_the_derived_public_key() {
    let acct = fresh_manager().derive_account(CHIP, Some("1234")).await.unwrap();
    let did = &acct.record.did;
    assert!(did.starts_with("did:key:z"));

    let decoded = decode_base58btc(&did["did:key:z".len()..]).unwrap();
    assert_eq!(&decoded[..2], &[0xed, 0x01]);
    assert_eq!(&decoded[2..], &acct.keypair().public_key_bytes()[..]);

    let parsed = DidKey::parse(did).unwrap();
    assert_eq!(parsed.public_key().to_hex(), acct.record.public_key);
}

#[tokio::test]
async fn signed_challenge_verifies_only_against_own_key() {
    let manager = fresh_manager();
    let mine = manager.derive_account(CHIP, Some("1234")).await.unwrap();
    let theirs = manager
        .derive_account("04:11:22:33:44:55:66", Some("1234"))
        .await
        .unwrap();

    let issuer = fresh_issuer();
    let challenge = issuer.issue().await.unwrap();
    let signed = sign_challenge(mine.keypair(), &challenge.challenge).unwrap();

    // A disconnected verifier needs nothing but the public key.
    let verdict = verify_signed(&signed, challenge.expires_at).unwrap();
    assert_eq!(verdict, ChallengeVerdict::Verified);

    let mut against_other = signed.clone();
    against_other.public_key = theirs.record.public_key.clone();
    assert_eq!(
        verify_signed(&against_other, challenge.expires_at).unwrap(),
        ChallengeVerdict::BadSignature
    );

    let sig = hex::decode(&signed.signature).unwrap();
    let pk = hex::decode(&mine.record.public_key).unwrap();
    assert_eq!(
        issuer.verify(&sig, &challenge.challenge, &pk).await.unwrap(),
        ChallengeVerdict::Verified
    );
    // Replay of the same signature is refused.
    assert_eq!(
        issuer.verify(&sig, &challenge.challenge, &pk).await.unwrap(),
        ChallengeVerdict::Unknown
    );
}

#[tokio::test]
async fn pin_changes_the_identity() {
    let a = fresh_manager().derive_account(CHIP, Some("1234")).await.unwrap();
    let b = fresh_manager().derive_account(CHIP, Some("5678")).await.unwrap();
    let none = fresh_manager().derive_account(CHIP, None).await.unwrap();

    assert_ne!(a.record.did, b.record.did);
    assert_ne!(a.record.did, none.record.did);
    assert!(a.record.has_pin);
    assert!(!none.record.has_pin);
}

#[tokio::test]
async fn expired_challenge_fails_with_valid_signature() {
    let acct = fresh_manager().derive_account(CHIP, None).await.unwrap();
    let challenge = Challenge::create_at(1_000, Duration::from_secs(300)).unwrap();
    let signed = sign_challenge(acct.keypair(), &challenge.challenge).unwrap();

    let sig = hex::decode(&signed.signature).unwrap();
    let pk = hex::decode(&signed.public_key).unwrap();
    let verdict = verify_challenge(&sig, &challenge.challenge, &pk, challenge.expires_at).unwrap();
    assert_eq!(verdict, ChallengeVerdict::Expired);
}

// ---------------------------------------------------------------------------
// Tap flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tap_flow_distinguishes_new_returning_and_mismatch() {
    let auth = TapAuthenticator::from_store(Arc::new(MemoryStore::new()), EngineConfig::default());

    let outcomes = [
        auth.authenticate_tap(CHIP, Some("1234")).await.unwrap(),
        auth.authenticate_tap(CHIP, Some("1234")).await.unwrap(),
        auth.authenticate_tap(CHIP, Some("9999")).await.unwrap(),
    ];

    assert!(matches!(outcomes[0], TapOutcome::NewIdentity { .. }));
    assert!(matches!(outcomes[1], TapOutcome::Returning { .. }));
    assert!(matches!(outcomes[2], TapOutcome::SignatureMismatch { .. }));

    assert!(outcomes[0].is_verified());
    assert!(outcomes[1].is_verified());
    assert!(!outcomes[2].is_verified());

    let record = auth.accounts().get_account(CHIP).await.unwrap().unwrap();
    assert_eq!(record.verification_count, 2);
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn device_signs_and_remote_verifier_checks() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let uid = ChipUid::parse(CHIP).unwrap();

    let mut identity = LocalIdentity::from_chip(&uid, Some("1234")).unwrap();
    let phone = identity
        .register_device("Phone", DeviceType::Phone, None)
        .unwrap();
    let ring = identity
        .register_device("Ring", DeviceType::Wearable, Some(uid.clone()))
        .unwrap();
    identity.save(store.as_ref()).await.unwrap();

    // Later, on the device: reload and sign.
    let loaded = LocalIdentity::load(store.as_ref(), &identity.user_id)
        .await
        .unwrap()
        .unwrap();
    let mut signer = DeviceSigner::new(loaded);

    let issuer = fresh_issuer();
    let challenge = issuer.issue().await.unwrap();
    let signed = signer.sign_challenge(&phone, &challenge.challenge).unwrap();

    // The verifier only knows the device's registered public key.
    let ring_pk = signer.identity().device(&ring).unwrap().public_key.clone();
    assert_ne!(signed.public_key, ring_pk);

    let sig = hex::decode(&signed.signature).unwrap();
    let wrong = hex::decode(&ring_pk).unwrap();
    let right = hex::decode(&signed.public_key).unwrap();
    let unconsumed = issuer.issue().await.unwrap();
    let signed_again = signer.sign_challenge(&phone, &unconsumed.challenge).unwrap();
    let sig_again = hex::decode(&signed_again.signature).unwrap();

    assert_eq!(
        issuer.verify(&sig, &challenge.challenge, &right).await.unwrap(),
        ChallengeVerdict::Verified
    );
    assert_eq!(
        issuer.verify(&sig_again, &unconsumed.challenge, &wrong).await.unwrap(),
        ChallengeVerdict::BadSignature
    );
}

// ---------------------------------------------------------------------------
// Storage outage
// ---------------------------------------------------------------------------

/// Memory store that can be taken offline, wholesale or for challenge
/// lookups only.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    offline: AtomicBool,
    challenges_offline: AtomicBool,
}

impl FlakyStore {
    fn gate(&self, key: &str, read: bool) -> StoreResult<()> {
        let challenge_read = read && key.starts_with("challenge:");
        if self.offline.load(Ordering::SeqCst)
            || (challenge_read && self.challenges_offline.load(Ordering::SeqCst))
        {
            return Err(StoreError::Unavailable("flaky".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.gate(key, true)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.gate(key, false)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.gate(key, false)?;
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.gate(prefix, true)?;
        self.inner.keys_with_prefix(prefix).await
    }
}

#[tokio::test]
async fn wrong_pin_while_offline_is_flagged_unconfirmed() {
    let store = Arc::new(FlakyStore::default());
    let auth = TapAuthenticator::from_store(store.clone(), EngineConfig::default());
    let registered = auth.authenticate_tap(CHIP, Some("1234")).await.unwrap();
    assert!(matches!(registered, TapOutcome::NewIdentity { persisted: true, .. }));

    store.offline.store(true, Ordering::SeqCst);
    let outcome = auth.authenticate_tap(CHIP, Some("4321")).await.unwrap();
    assert!(matches!(outcome, TapOutcome::Unconfirmed { .. }));
    assert!(!outcome.is_verified());
    assert!(!outcome.is_persisted());

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "unconfirmed");

    store.offline.store(false, Ordering::SeqCst);
    let record = auth.accounts().get_account(CHIP).await.unwrap().unwrap();
    assert_eq!(record.verification_count, 1);
    assert_eq!(record.did, registered.account().did);
}

#[tokio::test]
async fn challenge_registry_failure_degrades_without_double_counting() {
    let store = Arc::new(FlakyStore::default());
    let auth = TapAuthenticator::from_store(store.clone(), EngineConfig::default());
    auth.authenticate_tap(CHIP, None).await.unwrap();

    store.challenges_offline.store(true, Ordering::SeqCst);
    let outcome = auth.authenticate_tap(CHIP, None).await.unwrap();
    assert!(matches!(outcome, TapOutcome::Returning { .. }));
    assert!(outcome.is_verified());
    assert!(outcome.is_persisted());

    let record = auth.accounts().get_account(CHIP).await.unwrap().unwrap();
    assert_eq!(record.verification_count, 2);
    assert_eq!(outcome.account().verification_count, 2);
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_input_surfaces_as_invalid_input() {
    let manager = fresh_manager();

    let err: KairosError = manager.derive_account("zz:zz", None).await.unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err: KairosError = manager.derive_account(CHIP, Some("12ab")).await.unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err: KairosError = verify_challenge(&[0; 64], "nothex", &[0; 32], i64::MAX)
        .unwrap_err()
        .into();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
