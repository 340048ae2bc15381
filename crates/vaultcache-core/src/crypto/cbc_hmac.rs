//! AES-CBC with HMAC-SHA256 (encrypt-then-MAC).
//!
//! Blob layout: `[iv: 16 bytes][hmac tag: 32 bytes][ciphertext: N * 16 bytes]`.
//! The tag covers `iv || ciphertext` and is checked before any decryption.

use super::cipher::{Encryptor, Key};
use crate::error::{CacheError, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyBits {
    Aes128,
    Aes192,
    Aes256,
}

/// AES-CBC encryptor for one key size.
#[derive(Debug)]
pub struct AesCbc {
    bits: KeyBits,
}

impl AesCbc {
    pub const fn aes128() -> Self {
        Self {
            bits: KeyBits::Aes128,
        }
    }

    pub const fn aes192() -> Self {
        Self {
            bits: KeyBits::Aes192,
        }
    }

    pub const fn aes256() -> Self {
        Self {
            bits: KeyBits::Aes256,
        }
    }

    fn tag(&self, key: &Key, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(key.secret()).map_err(|e| CacheError::Cipher {
            message: format!("Failed to initialize HMAC: {}", e),
        })?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

fn invalid_length(e: impl std::fmt::Display) -> CacheError {
    CacheError::Cipher {
        message: format!("Invalid key or IV length: {}", e),
    }
}

impl Encryptor for AesCbc {
    fn key_size(&self) -> usize {
        match self.bits {
            KeyBits::Aes128 => 16,
            KeyBits::Aes192 => 24,
            KeyBits::Aes256 => 32,
        }
    }

    fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let secret = key.secret();
        let ciphertext = match self.bits {
            KeyBits::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(secret, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            KeyBits::Aes192 => cbc::Encryptor::<Aes192>::new_from_slices(secret, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            KeyBits::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(secret, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };

        let tag = self.tag(key, &iv, &ciphertext)?.finalize().into_bytes();

        let mut result = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
        result.extend_from_slice(&iv);
        result.extend_from_slice(&tag);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, key: &Key, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < IV_LEN + TAG_LEN + BLOCK_LEN {
            return Err(CacheError::Envelope {
                message: "CBC blob too short".to_string(),
            });
        }

        let (iv, rest) = blob.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        self.tag(key, iv, ciphertext)?
            .verify_slice(tag)
            .map_err(|_| CacheError::Authentication)?;

        let secret = key.secret();
        let plaintext = match self.bits {
            KeyBits::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(secret, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            KeyBits::Aes192 => cbc::Decryptor::<Aes192>::new_from_slices(secret, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            KeyBits::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(secret, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };

        plaintext.map_err(|e| CacheError::Cipher {
            message: format!("Invalid padding: {}", e),
        })
    }
}
