//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for key material at rest. The vault module
//! layers passphrase stretching and format versioning on top; this module
//! only knows keys, IVs and ciphertexts.
//!
//! ## Nonce management
//!
//! Every call draws a fresh random 96-bit IV from the OS RNG. Reusing an
//! (key, IV) pair under GCM leaks the XOR of plaintexts and lets an attacker
//! forge tags. Vault keys are derived per blob from a random salt, so each
//! key only ever sees a handful of IVs.
//!
//! ## Wire format
//!
//! [`encrypt`] returns `iv || ciphertext || tag` as one buffer. The
//! AAD-bearing variants return the IV separately because the vault stores it
//! as its own field.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

use super::random::{random_array, RandomError};
use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Decryption failures are deliberately uniform: wrong key, wrong AAD and
/// corrupted ciphertext all look the same.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid IV length: expected {AES_NONCE_LENGTH} bytes")]
    InvalidNonceLength,

    #[error("ciphertext too short: must be at least {AES_NONCE_LENGTH} bytes")]
    CiphertextTooShort,

    #[error(transparent)]
    Random(#[from] RandomError),
}

/// Encrypt with a random IV. Returns `iv || ciphertext || tag`.
pub fn encrypt(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let (iv, ciphertext) = encrypt_with_aad(key, plaintext, &[])?;
    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`].
pub fn decrypt(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }
    let (iv, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    decrypt_with_aad(key, iv, ciphertext, &[])
}

/// Encrypt with Additional Authenticated Data.
///
/// Returns `(iv, ciphertext || tag)`. The same AAD must be supplied to
/// [`decrypt_with_aad`].
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let iv: [u8; AES_NONCE_LENGTH] = random_array()?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), payload)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((iv, ciphertext))
}

/// Decrypt ciphertext produced by [`encrypt_with_aad`].
///
/// The IV is taken as a slice because it usually comes straight out of a
/// deserialized blob; its length is checked here.
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if iv.len() != AES_NONCE_LENGTH {
        return Err(EncryptionError::InvalidNonceLength);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(Nonce::from_slice(iv), payload)
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AES_TAG_LENGTH;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let sealed = encrypt(&key, b"master seed bytes").unwrap();
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"master seed bytes");
    }

    #[test]
    fn sealed_length_is_iv_plus_plaintext_plus_tag() {
        let key = test_key();
        let sealed = encrypt(&key, &[0u8; 32]).unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + 32 + AES_TAG_LENGTH);
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let sealed = encrypt(&key, b"secret").unwrap();
        let mut wrong = key;
        wrong[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&wrong, &sealed),
            Err(EncryptionError::DecryptFailed)
        ));
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt(&key, b"secret").unwrap();
        sealed[AES_NONCE_LENGTH] ^= 0xFF;
        assert!(decrypt(&key, &sealed).is_err());
    }

    #[test]
    fn ivs_are_unique() {
        let key = test_key();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }

    #[test]
    fn aad_mismatch_fails() {
        let key = test_key();
        let (iv, ct) = encrypt_with_aad(&key, b"secret", b"v2").unwrap();
        assert_eq!(decrypt_with_aad(&key, &iv, &ct, b"v2").unwrap(), b"secret");
        assert!(decrypt_with_aad(&key, &iv, &ct, b"v1").is_err());
    }

    #[test]
    fn short_inputs_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt(&key, &[0u8; 4]),
            Err(EncryptionError::CiphertextTooShort)
        ));
        assert!(matches!(
            decrypt_with_aad(&key, &[0u8; 8], &[0u8; 32], &[]),
            Err(EncryptionError::InvalidNonceLength)
        ));
    }
}
