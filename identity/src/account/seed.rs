//! Identity seed derivation.
//!
//! A chip UID (plus an optional PIN) becomes a 32-byte seed through
//! HKDF-SHA256 over a domain-separated string:
//!
//! ```text
//! PIN-less:       ikm = "kairos:uid:<UID>"
//! PIN-protected:  ikm = "kairos:uid:<UID>:pin:<PIN>"
//! seed = HKDF-SHA256(ikm, salt = "kairos-identity-seed-v1",
//!                         info = "kairos:ed25519-seed", 32)
//! ```
//!
//! The seed is the Ed25519 secret key. No clock, counter or randomness goes
//! in, so the same chip and PIN reproduce the same identity on any machine,
//! forever.
//!
//! A wrong PIN is not detected here. It yields a perfectly valid, different
//! seed. Detection happens one layer up, when the derived key is compared
//! against the one recorded for the chip.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use super::uid::ChipUid;
use crate::config::{
    DEVICE_HKDF_INFO_PREFIX, DEVICE_HKDF_SALT, MAX_PIN_LENGTH, MIN_PIN_LENGTH,
    SEED_DOMAIN_PREFIX, SEED_HKDF_INFO, SEED_HKDF_SALT, SEED_LENGTH,
};
use crate::crypto::kdf::{derive_key_array, KdfError};
use crate::crypto::keys::KairosKeypair;
use crate::crypto::random::{random_array, RandomError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("PIN must be {MIN_PIN_LENGTH}-{MAX_PIN_LENGTH} ASCII digits")]
    InvalidPin,

    #[error("invalid seed encoding: {0}")]
    InvalidEncoding(String),

    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Random(#[from] RandomError),
}

/// Validate an optional PIN. An empty string means "no PIN".
pub fn normalize_pin(pin: Option<&str>) -> Result<Option<&str>, SeedError> {
    match pin {
        None => Ok(None),
        Some("") => Ok(None),
        Some(p) => {
            let ok = (MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&p.len())
                && p.bytes().all(|b| b.is_ascii_digit());
            if ok {
                Ok(Some(p))
            } else {
                Err(SeedError::InvalidPin)
            }
        }
    }
}

/// A 32-byte master seed. Wiped from memory on drop.
#[derive(Clone)]
pub struct IdentitySeed {
    bytes: Zeroizing<[u8; SEED_LENGTH]>,
}

impl IdentitySeed {
    /// Derive the seed for a chip, optionally bound to a PIN.
    ///
    /// The PIN is validated here; callers that accept user input should
    /// still run it through [`normalize_pin`] first so an empty field maps
    /// to PIN-less mode.
    pub fn derive(uid: &ChipUid, pin: Option<&str>) -> Result<Self, SeedError> {
        let pin = normalize_pin(pin)?;
        let ikm = Zeroizing::new(match pin {
            Some(p) => format!("{SEED_DOMAIN_PREFIX}{uid}:pin:{p}"),
            None => format!("{SEED_DOMAIN_PREFIX}{uid}"),
        });
        let bytes = derive_key_array::<SEED_LENGTH>(ikm.as_bytes(), SEED_HKDF_SALT, SEED_HKDF_INFO)?;
        Ok(Self { bytes })
    }

    /// A fresh random master seed, for identities not bound to a chip.
    pub fn generate() -> Result<Self, SeedError> {
        Ok(Self {
            bytes: Zeroizing::new(random_array::<SEED_LENGTH>()?),
        })
    }

    pub fn from_bytes(bytes: [u8; SEED_LENGTH]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, SeedError> {
        let decoded = Zeroizing::new(
            hex::decode(s).map_err(|e| SeedError::InvalidEncoding(e.to_string()))?,
        );
        let bytes: [u8; SEED_LENGTH] = decoded.as_slice().try_into().map_err(|_| {
            SeedError::InvalidEncoding(format!(
                "expected {SEED_LENGTH} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.bytes
    }

    /// Hex form for the persisted identity layout. Handle with care.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&*self.bytes))
    }

    /// The Ed25519 keypair this seed stands for.
    pub fn keypair(&self) -> KairosKeypair {
        KairosKeypair::from_seed(&self.bytes)
    }

    /// Derive the sub-seed for one device.
    ///
    /// HKDF is one-way: a leaked device key reveals neither the master seed
    /// nor any sibling device key.
    pub fn derive_device_seed(&self, device_id: &str) -> Result<IdentitySeed, SeedError> {
        if device_id.is_empty() {
            return Err(SeedError::EmptyDeviceId);
        }
        let info = format!("{DEVICE_HKDF_INFO_PREFIX}{device_id}");
        let bytes = derive_key_array::<SEED_LENGTH>(&*self.bytes, DEVICE_HKDF_SALT, info.as_bytes())?;
        Ok(Self { bytes })
    }

    /// Convenience for `derive_device_seed(id)?.keypair()`.
    pub fn derive_device_keypair(&self, device_id: &str) -> Result<KairosKeypair, SeedError> {
        Ok(self.derive_device_seed(device_id)?.keypair())
    }
}

impl fmt::Debug for IdentitySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentitySeed(<redacted>)")
    }
}

impl PartialEq for IdentitySeed {
    fn eq(&self, other: &Self) -> bool {
        crate::crypto::random::constant_time_eq(&*self.bytes, &*other.bytes)
    }
}

impl Eq for IdentitySeed {}

impl Serialize for IdentitySeed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentitySeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
