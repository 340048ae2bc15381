//! AES-256-GCM implementation of the [`Encryptor`] trait.

use super::cipher::{Encryptor, Key};
use crate::error::{CacheError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

/// Nonce size for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Authentication tag size appended by AES-GCM.
const TAG_LEN: usize = 16;

/// AES-256-GCM AEAD cipher.
///
/// Encrypted blob layout: `[nonce: 12 bytes][ciphertext + tag: N + 16 bytes]`.
#[derive(Debug)]
pub struct Aes256GcmEncryptor;

impl Encryptor for Aes256GcmEncryptor {
    fn key_size(&self) -> usize {
        32
    }

    fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.secret()).map_err(|e| CacheError::Cipher {
            message: format!("Invalid AES-256-GCM key: {}", e),
        })?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CacheError::Cipher {
                message: format!("AES-256-GCM encryption failed: {}", e),
            })?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, key: &Key, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CacheError::Envelope {
                message: "GCM blob too short".to_string(),
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(key.secret()).map_err(|e| CacheError::Cipher {
            message: format!("Invalid AES-256-GCM key: {}", e),
        })?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CacheError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Cipher;

    fn key(id: u32, byte: u8) -> Key {
        Key::new(id, vec![byte; 32], Cipher::Aes256Gcm).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = key(0, 0x42);
        let blob = Aes256GcmEncryptor.encrypt(&key, b"hello cache").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + 11 + TAG_LEN);
        assert_eq!(
            Aes256GcmEncryptor.decrypt(&key, &blob).unwrap(),
            b"hello cache"
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = Aes256GcmEncryptor.encrypt(&key(0, 0x42), b"secret").unwrap();
        let result = Aes256GcmEncryptor.decrypt(&key(1, 0x43), &blob);
        assert!(matches!(result, Err(CacheError::Authentication)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = key(0, 0x42);
        let mut blob = Aes256GcmEncryptor.encrypt(&key, b"secret").unwrap();
        blob[NONCE_LEN] ^= 0x01;
        assert!(matches!(
            Aes256GcmEncryptor.decrypt(&key, &blob),
            Err(CacheError::Authentication)
        ));
    }

    #[test]
    fn test_too_short_blob_fails() {
        let result = Aes256GcmEncryptor.decrypt(&key(0, 0x42), &[0u8; 20]);
        assert!(matches!(result, Err(CacheError::Envelope { .. })));
    }

    #[test]
    fn test_different_nonces_produce_different_ciphertexts() {
        let key = key(0, 0x42);
        let first = Aes256GcmEncryptor.encrypt(&key, b"same input").unwrap();
        let second = Aes256GcmEncryptor.encrypt(&key, b"same input").unwrap();
        assert_ne!(first, second);
    }
}
