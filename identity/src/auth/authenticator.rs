//! Challenge issuing, device-side signing and the full tap flow.
//!
//! ```text
//!  verifier                           identity-owning device
//!  ────────                           ──────────────────────
//!  ChallengeIssuer::issue ── challenge ──▶ DeviceSigner::sign_challenge
//!  ChallengeIssuer::verify ◀─ signature, publicKey ─┘
//! ```
//!
//! The issuer keeps every outstanding challenge in its store and deletes
//! it on first verification, so a captured signature cannot be replayed
//! even inside the expiry window.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::challenge::{
    now_ms, sign_challenge, validate_challenge, verify_challenge_at, AuthenticationResult,
    Challenge, ChallengeVerdict, SignedChallenge,
};
use super::AuthError;
use crate::account::{AccountManager, AccountStatus, AccountSummary, LocalIdentity};
use crate::config::CHALLENGE_KEY_PREFIX;
use crate::store::{get_json, put_json, KeyValueStore};
use serde::Serialize;

// ---------------------------------------------------------------------------
// ChallengeIssuer
// ---------------------------------------------------------------------------

/// Issues challenges and verifies each one at most once.
pub struct ChallengeIssuer {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ChallengeIssuer {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create and record a fresh challenge.
    pub async fn issue(&self) -> Result<Challenge, AuthError> {
        let challenge = Challenge::create_with_ttl(self.ttl)?;
        self.register(&challenge).await?;
        debug!(expires_at = challenge.expires_at, "challenge issued");
        Ok(challenge)
    }

    /// Record an externally created challenge as outstanding.
    pub async fn register(&self, challenge: &Challenge) -> Result<(), AuthError> {
        validate_challenge(&challenge.challenge)?;
        put_json(self.store.as_ref(), &challenge_key(&challenge.challenge), challenge).await?;
        Ok(())
    }

    /// Verify and consume a challenge.
    pub async fn verify(
        &self,
        signature: &[u8],
        challenge: &str,
        public_key: &[u8],
    ) -> Result<ChallengeVerdict, AuthError> {
        self.verify_at(signature, challenge, public_key, now_ms()).await
    }

    /// [`verify`](Self::verify) against an explicit clock.
    ///
    /// The challenge is consumed whatever the verdict. A failed attempt
    /// burns it; the prover asks for a new one.
    pub async fn verify_at(
        &self,
        signature: &[u8],
        challenge: &str,
        public_key: &[u8],
        now_ms: i64,
    ) -> Result<ChallengeVerdict, AuthError> {
        validate_challenge(challenge)?;
        let key = challenge_key(challenge);

        let Some(issued) = get_json::<Challenge>(self.store.as_ref(), &key).await? else {
            debug!("challenge unknown or already consumed");
            return Ok(ChallengeVerdict::Unknown);
        };
        // Whoever deletes it first owns the verification.
        if !self.store.delete(&key).await? {
            return Ok(ChallengeVerdict::Unknown);
        }

        let verdict = verify_challenge_at(signature, challenge, public_key, issued.expires_at, now_ms)?;
        debug!(verdict = %verdict, "challenge verified");
        Ok(verdict)
    }

    /// Drop expired challenges. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        self.purge_expired_at(now_ms()).await
    }

    pub async fn purge_expired_at(&self, now_ms: i64) -> Result<usize, AuthError> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(CHALLENGE_KEY_PREFIX).await? {
            let expired = match get_json::<Challenge>(self.store.as_ref(), &key).await {
                Ok(Some(c)) => c.is_expired_at(now_ms),
                Ok(None) => false,
                // Unreadable entries can never verify.
                Err(_) => true,
            };
            if expired && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "purged expired challenges");
        }
        Ok(removed)
    }

    /// Number of outstanding challenges.
    pub async fn outstanding(&self) -> Result<usize, AuthError> {
        Ok(self.store.keys_with_prefix(CHALLENGE_KEY_PREFIX).await?.len())
    }
}

fn challenge_key(challenge: &str) -> String {
    format!("{CHALLENGE_KEY_PREFIX}{}", challenge.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// DeviceSigner
// ---------------------------------------------------------------------------

/// Signs challenges on behalf of a local identity's devices.
///
/// The device private key is rebuilt from the master seed for each
/// signature and dropped (zeroized) when the call returns.
pub struct DeviceSigner {
    identity: LocalIdentity,
}

impl DeviceSigner {
    pub fn new(identity: LocalIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn into_identity(self) -> LocalIdentity {
        self.identity
    }

    /// Sign `challenge` with the key of `device_id` and stamp its
    /// `lastUsed`.
    pub fn sign_challenge(
        &mut self,
        device_id: &str,
        challenge: &str,
    ) -> Result<SignedChallenge, AuthError> {
        validate_challenge(challenge)?;
        let signed = {
            let keypair = self.identity.device_keypair(device_id)?;
            sign_challenge(&keypair, challenge)?
        };
        self.identity.touch_device(device_id);
        debug!(device_id = %device_id, "challenge signed");
        Ok(signed)
    }
}

// ---------------------------------------------------------------------------
// Tap authentication
// ---------------------------------------------------------------------------

/// The three outcomes a caller must tell apart, plus the degraded case
/// where the registry could not be consulted at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum TapOutcome {
    /// Never seen this chip before.
    NewIdentity {
        account: AccountSummary,
        auth: AuthenticationResult,
        /// Whether the new record reached the store.
        persisted: bool,
    },
    /// Seen before, signature verified against the recorded key.
    Returning {
        account: AccountSummary,
        auth: AuthenticationResult,
        /// Whether the counter bump reached the store.
        persisted: bool,
    },
    /// Seen before, but the signature does not verify against the recorded
    /// key. Most likely a wrong PIN.
    #[serde(rename_all = "camelCase")]
    SignatureMismatch {
        account: AccountSummary,
        derived_did: String,
        auth: AuthenticationResult,
    },
    /// The account registry was unreachable. `account` is the freshly
    /// derived identity; whether it matches the chip's recorded key, or
    /// whether the chip has a record at all, is unknown. `auth` only shows
    /// that the derived key signed its own challenge.
    Unconfirmed {
        account: AccountSummary,
        auth: AuthenticationResult,
    },
}

impl TapOutcome {
    pub fn account(&self) -> &AccountSummary {
        match self {
            TapOutcome::NewIdentity { account, .. }
            | TapOutcome::Returning { account, .. }
            | TapOutcome::SignatureMismatch { account, .. }
            | TapOutcome::Unconfirmed { account, .. } => account,
        }
    }

    pub fn auth(&self) -> &AuthenticationResult {
        match self {
            TapOutcome::NewIdentity { auth, .. }
            | TapOutcome::Returning { auth, .. }
            | TapOutcome::SignatureMismatch { auth, .. }
            | TapOutcome::Unconfirmed { auth, .. } => auth,
        }
    }

    /// Authenticated against the chip's record. Never true for
    /// [`TapOutcome::Unconfirmed`].
    pub fn is_verified(&self) -> bool {
        match self {
            TapOutcome::NewIdentity { auth, .. } | TapOutcome::Returning { auth, .. } => {
                auth.verified
            }
            TapOutcome::SignatureMismatch { .. } | TapOutcome::Unconfirmed { .. } => false,
        }
    }

    /// Whether the account state shown is what the store now holds.
    pub fn is_persisted(&self) -> bool {
        match self {
            TapOutcome::NewIdentity { persisted, .. } | TapOutcome::Returning { persisted, .. } => {
                *persisted
            }
            TapOutcome::SignatureMismatch { .. } => true,
            TapOutcome::Unconfirmed { .. } => false,
        }
    }
}

/// Runs a whole tap: derive, challenge, sign locally, verify.
pub struct TapAuthenticator {
    accounts: Arc<AccountManager>,
    issuer: ChallengeIssuer,
}

impl TapAuthenticator {
    pub fn new(accounts: Arc<AccountManager>, issuer: ChallengeIssuer) -> Self {
        Self { accounts, issuer }
    }

    /// Build one over a single shared store.
    pub fn from_store(store: Arc<dyn KeyValueStore>, config: crate::config::EngineConfig) -> Self {
        let issuer = ChallengeIssuer::new(Arc::clone(&store), config.challenge_ttl());
        let accounts = Arc::new(AccountManager::with_config(store, config));
        Self::new(accounts, issuer)
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn issuer(&self) -> &ChallengeIssuer {
        &self.issuer
    }

    /// Authenticate one chip tap.
    ///
    /// The signature is always checked against the public key on record
    /// for the chip, never against the key that just signed. A returning
    /// chip's counter moves only after that check passes.
    ///
    /// Storage outages degrade instead of failing the tap. An unreadable
    /// account registry yields [`TapOutcome::Unconfirmed`]. An unusable
    /// challenge registry falls back to verifying the challenge directly,
    /// without replay protection.
    pub async fn authenticate_tap(
        &self,
        chip_uid: &str,
        pin: Option<&str>,
    ) -> Result<TapOutcome, AuthError> {
        let derived = self.accounts.lookup_account(chip_uid, pin).await?;

        let challenge = Challenge::create_with_ttl(self.issuer.ttl())?;
        let registered = match self.issuer.register(&challenge).await {
            Ok(()) => true,
            Err(AuthError::Store(e)) => {
                warn!(error = %e, "challenge registry unavailable, verifying without it");
                false
            }
            Err(e) => return Err(e),
        };

        let signed = sign_challenge(derived.keypair(), &challenge.challenge)?;
        let signature = hex::decode(&signed.signature).unwrap_or_default();
        let expected_key = hex::decode(&derived.record.public_key).unwrap_or_default();

        let verify_directly = || {
            verify_challenge_at(
                &signature,
                &challenge.challenge,
                &expected_key,
                challenge.expires_at,
                now_ms(),
            )
        };
        let verdict = if registered {
            match self
                .issuer
                .verify(&signature, &challenge.challenge, &expected_key)
                .await
            {
                Ok(verdict) => verdict,
                Err(AuthError::Store(e)) => {
                    warn!(error = %e, "challenge lookup failed, verifying without registry");
                    verify_directly()?
                }
                Err(e) => return Err(e),
            }
        } else {
            verify_directly()?
        };

        let mut record = derived.record.clone();
        let mut persisted = derived.persisted;
        if derived.status == AccountStatus::Returning && verdict.is_verified() {
            match self
                .accounts
                .record_verified_tap(&record.chip_uid, &derived.derived_public_key())
                .await
            {
                Ok(Some(updated)) => record = updated,
                Ok(None) => {
                    warn!(chip_uid = %record.chip_uid, "account changed during tap, counter not bumped");
                    persisted = false;
                }
                Err(e) => {
                    warn!(chip_uid = %record.chip_uid, error = %e, "counter bump failed, record not persisted");
                    persisted = false;
                }
            }
        }

        let account = record.summary();
        let auth = AuthenticationResult::new(signed, verdict);
        info!(
            chip_uid = %record.chip_uid,
            account_id = %account.account_id,
            status = ?derived.status,
            verdict = %verdict,
            persisted,
            "tap authenticated"
        );

        Ok(match (derived.status, verdict.is_verified()) {
            (AccountStatus::Unconfirmed, _) => TapOutcome::Unconfirmed { account, auth },
            (AccountStatus::Created, true) => TapOutcome::NewIdentity {
                account,
                auth,
                persisted,
            },
            (AccountStatus::Returning, true) => TapOutcome::Returning {
                account,
                auth,
                persisted,
            },
            _ => TapOutcome::SignatureMismatch {
                account,
                derived_did: derived.derived_did(),
                auth,
            },
        })
    }
}
