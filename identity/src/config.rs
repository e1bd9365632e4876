//! # Identity Engine Configuration & Constants
//!
//! Every magic number in the identity engine lives here. Seeds, DIDs and
//! vault blobs written today must still resolve years from now, so most of
//! these values are frozen the moment a chip is first tapped. Changing a
//! domain-separation string silently re-keys every identity in existence.
//!
//! Runtime-tunable knobs (timeouts, TTLs, iteration counts for *new* vault
//! blobs) live in [`EngineConfig`]. Everything else is a `const`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Ed25519 Parameters
// ---------------------------------------------------------------------------

/// Ed25519 secret key (seed) length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// DID:key
// ---------------------------------------------------------------------------

/// Prefix of every identifier produced by this crate, including the
/// multibase `z` (base58btc) marker.
pub const DID_KEY_PREFIX: &str = "did:key:z";

/// The DID method prefix without the multibase marker.
pub const DID_METHOD_PREFIX: &str = "did:key:";

/// Multibase code for base58btc.
pub const MULTIBASE_BASE58BTC: char = 'z';

/// Multicodec prefix for an Ed25519 public key (varint of 0xed).
pub const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

/// Context URI for the W3C DID Core specification.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Context URI for the Ed25519 verification key suite.
pub const ED25519_CONTEXT: &str = "https://w3id.org/security/suites/ed25519-2020/v1";

/// Verification method type for Ed25519 public keys.
pub const VERIFICATION_KEY_TYPE: &str = "Ed25519VerificationKey2020";

// ---------------------------------------------------------------------------
// Seed & Key Derivation
// ---------------------------------------------------------------------------

/// Domain prefix for the identity seed input keying material.
/// The full IKM is `kairos:uid:<UID>` or `kairos:uid:<UID>:pin:<PIN>`.
pub const SEED_DOMAIN_PREFIX: &str = "kairos:uid:";

/// HKDF salt for chip-derived identity seeds.
pub const SEED_HKDF_SALT: &[u8] = b"kairos-identity-seed-v1";

/// HKDF info string for chip-derived identity seeds.
pub const SEED_HKDF_INFO: &[u8] = b"kairos:ed25519-seed";

/// HKDF salt for device sub-keys derived from a master seed.
pub const DEVICE_HKDF_SALT: &[u8] = b"kairos-device-key-v1";

/// Info prefix for device sub-keys. The device id is appended.
pub const DEVICE_HKDF_INFO_PREFIX: &str = "kairos:device:";

/// Human-readable derivation path prefix stored alongside device records.
pub const DEVICE_DERIVATION_PATH_PREFIX: &str = "m/kairos/device/";

/// Identity seed length in bytes.
pub const SEED_LENGTH: usize = 32;

/// Upper bound on a single HKDF expansion (255 * SHA-256 output length).
pub const HKDF_MAX_OUTPUT_LENGTH: usize = 255 * 32;

// ---------------------------------------------------------------------------
// Chip UIDs & PINs
// ---------------------------------------------------------------------------

/// Valid ISO 14443 UID sizes: single (4), double (7) and triple (10) size.
pub const VALID_UID_LENGTHS: [usize; 3] = [4, 7, 10];

/// Shortest PIN accepted in PIN-protected mode.
pub const MIN_PIN_LENGTH: usize = 4;

/// Longest PIN accepted in PIN-protected mode.
pub const MAX_PIN_LENGTH: usize = 12;

/// Account ids are `kairos_` followed by this many hex chars of SHA-256(pk).
pub const ACCOUNT_ID_HEX_LENGTH: usize = 16;

/// Prefix for human-shareable account ids.
pub const ACCOUNT_ID_PREFIX: &str = "kairos_";

/// Salt length for the optional PIN verifier.
pub const PIN_SALT_LENGTH: usize = 16;

/// PBKDF2 iterations for the optional PIN verifier.
pub const PIN_VERIFIER_ITERATIONS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Symmetric Encryption (vault)
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM IV length in bytes.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Salt length for passphrase-derived vault keys. Must fall in 16..=32.
pub const VAULT_SALT_LENGTH: usize = 32;

/// Shortest vault salt accepted on decryption.
pub const VAULT_MIN_SALT_LENGTH: usize = 16;

/// Longest vault salt accepted on decryption.
pub const VAULT_MAX_SALT_LENGTH: usize = 32;

/// Vault format v1: PBKDF2-HMAC-SHA256 with 100k iterations.
pub const VAULT_FORMAT_V1: &str = "v1";

/// PBKDF2 iterations for v1 blobs.
pub const VAULT_V1_ITERATIONS: u32 = 100_000;

/// Vault format v2: PBKDF2-HMAC-SHA256 with 310k iterations.
pub const VAULT_FORMAT_V2: &str = "v2";

/// PBKDF2 iterations for v2 blobs.
pub const VAULT_V2_ITERATIONS: u32 = 310_000;

/// Format written by [`crate::vault::keystore`] for new blobs.
pub const VAULT_CURRENT_FORMAT: &str = VAULT_FORMAT_V2;

// ---------------------------------------------------------------------------
// Challenge-Response
// ---------------------------------------------------------------------------

/// Random bytes in a challenge (hex-encoded to 64 chars).
pub const CHALLENGE_LENGTH: usize = 32;

/// Default challenge lifetime: 5 minutes.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// NFC
// ---------------------------------------------------------------------------

/// The tag firmware checks for a tag every 100 ms. We do the same.
pub const NFC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a tap listener waits before giving up.
pub const DEFAULT_TAP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Storage Keys
// ---------------------------------------------------------------------------

/// Key prefix for account records, indexed by canonical chip UID.
pub const ACCOUNT_KEY_PREFIX: &str = "account:";

/// Key prefix for local identity records, indexed by user id.
pub const IDENTITY_KEY_PREFIX: &str = "identity:";

/// Key prefix for passphrase-sealed local identities, indexed by user id.
pub const SEALED_IDENTITY_KEY_PREFIX: &str = "sealed:";

/// Key prefix for issued-but-unconsumed challenges.
pub const CHALLENGE_KEY_PREFIX: &str = "challenge:";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Runtime-tunable engine parameters.
///
/// Defaults match the constants above. The node binary overrides them from
/// CLI flags and environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of issued challenges in milliseconds.
    pub challenge_ttl_ms: u64,

    /// How long a tap listener waits for a tag, in milliseconds.
    pub tap_timeout_ms: u64,

    /// Interval between reader polls, in milliseconds.
    pub tap_poll_interval_ms: u64,

    /// Vault format written for new encrypted blobs.
    pub vault_format: String,

    /// Store a PBKDF2 PIN verifier on PIN-protected accounts so
    /// [`crate::account::AccountManager::check_pin`] can answer explicitly.
    pub persist_pin_verifier: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_ms: DEFAULT_CHALLENGE_TTL.as_millis() as u64,
            tap_timeout_ms: DEFAULT_TAP_TIMEOUT.as_millis() as u64,
            tap_poll_interval_ms: NFC_POLL_INTERVAL.as_millis() as u64,
            vault_format: VAULT_CURRENT_FORMAT.to_string(),
            persist_pin_verifier: false,
        }
    }
}

impl EngineConfig {
    /// Challenge lifetime as a `Duration`.
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_millis(self.challenge_ttl_ms)
    }

    /// Tap timeout as a `Duration`.
    pub fn tap_timeout(&self) -> Duration {
        Duration::from_millis(self.tap_timeout_ms)
    }

    /// Poll interval as a `Duration`. Never zero.
    pub fn tap_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tap_poll_interval_ms.max(1))
    }
}
