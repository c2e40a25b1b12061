//! AES-256-GCM value cipher for the SQL backend.
//!
//! A sealed value is laid out as `nonce || ciphertext || tag`, with a new
//! random 96-bit nonce per call, so sealing the same secret twice never
//! produces the same bytes.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kvsecrets_storage::{SecretsCipher, StorageError};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Key material for [`AesGcmCipher`]. Wiped on drop, redacted in `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// A fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&Aes256Gcm::generate_key(OsRng));
        Self(bytes)
    }

    /// Parse the `KVSECRETS_ENCRYPTION_KEY` form: standard base64 of exactly
    /// 32 bytes, surrounding whitespace ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] for anything else.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
            CryptoError::InvalidKey {
                reason: e.to_string(),
            }
        })?);
        <[u8; 32]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey {
                reason: format!("expected 32 bytes, got {}", decoded.len()),
            })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// [`SecretsCipher`] sealing every value under one AES-256-GCM key.
pub struct AesGcmCipher {
    key: EncryptionKey,
}

impl AesGcmCipher {
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key.0))
    }

    /// Seal `plaintext` under a new random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD rejects the input.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let body = self
            .aead()
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption {
                reason: e.to_string(),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN.saturating_add(body.len()));
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&body);
        Ok(sealed)
    }

    /// Open a value produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// [`CryptoError::CiphertextTooShort`] when there is no room for a nonce
    /// and tag, [`CryptoError::Decryption`] when the tag does not verify.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let min_len = NONCE_LEN + TAG_LEN;
        if sealed.len() < min_len {
            return Err(CryptoError::CiphertextTooShort {
                expected: min_len,
                actual: sealed.len(),
            });
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        self.aead()
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl SecretsCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(self.seal(plaintext)?)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(self.open(ciphertext)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(EncryptionKey::generate())
    }

    #[test]
    fn sealed_value_opens_to_the_original() {
        let cipher = cipher();
        let payload = br#"{"basicAuthPassword":"p@ss"}"#;
        let sealed = cipher.seal(payload).unwrap();

        assert_ne!(&sealed[NONCE_LEN..], payload.as_slice());
        assert_eq!(cipher.open(&sealed).unwrap(), payload);
    }

    #[test]
    fn same_value_seals_differently_each_time() {
        let cipher = cipher();
        assert_ne!(cipher.seal(b"token").unwrap(), cipher.seal(b"token").unwrap());
    }

    #[test]
    fn other_key_cannot_open() {
        let sealed = cipher().seal(b"token").unwrap();
        assert!(matches!(
            cipher().open(&sealed),
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[test]
    fn truncated_or_flipped_input_is_rejected() {
        let cipher = cipher();
        assert!(matches!(
            cipher.open(&[0u8; 10]),
            Err(CryptoError::CiphertextTooShort {
                expected: 28,
                actual: 10
            })
        ));

        let mut sealed = cipher.seal(b"token").unwrap();
        if let Some(last) = sealed.last_mut() {
            *last ^= 0x01;
        }
        assert!(matches!(
            cipher.open(&sealed),
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[test]
    fn base64_key_must_be_32_bytes() {
        let encoded = format!(" {}\n", BASE64.encode([7u8; 32]));
        let key = EncryptionKey::from_base64(&encoded).unwrap();
        let from_raw = AesGcmCipher::new(EncryptionKey::from_bytes([7u8; 32]));
        let sealed = AesGcmCipher::new(key).seal(b"v").unwrap();
        assert_eq!(from_raw.open(&sealed).unwrap(), b"v");

        assert!(matches!(
            EncryptionKey::from_base64(&BASE64.encode([7u8; 16])),
            Err(CryptoError::InvalidKey { .. })
        ));
        assert!(EncryptionKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        let debug = format!("{:?}", EncryptionKey::from_bytes([42u8; 32]));
        assert_eq!(debug, "EncryptionKey([REDACTED])");
    }

    #[test]
    fn store_facing_errors_are_cipher_errors() {
        let cipher = cipher();
        let sealed = SecretsCipher::encrypt(&cipher, b"value").unwrap();
        assert_eq!(SecretsCipher::decrypt(&cipher, &sealed).unwrap(), b"value");
        assert!(matches!(
            SecretsCipher::decrypt(&cipher, b"short"),
            Err(StorageError::Cipher { .. })
        ));
    }
}
