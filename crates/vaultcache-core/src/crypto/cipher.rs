//! Encryptor trait, cipher selection and key material.

use super::cbc_hmac::AesCbc;
use super::gcm::Aes256GcmEncryptor;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A pure symmetric encryption algorithm.
///
/// Implementations generate a fresh random IV or nonce on every call to
/// [`encrypt`](Self::encrypt) and embed it in the returned blob, so the
/// blob is self-contained for [`decrypt`](Self::decrypt).
pub trait Encryptor: Send + Sync {
    /// Required secret length in bytes.
    fn key_size(&self) -> usize;

    /// Encrypt and authenticate `plaintext` under `key`.
    fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Verify and decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with [`CacheError::Authentication`] when the blob was tampered
    /// with or was produced under a different key.
    fn decrypt(&self, key: &Key, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Supported cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cipher {
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    #[serde(rename = "aes-192-cbc")]
    Aes192Cbc,
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

static AES_128_CBC: AesCbc = AesCbc::aes128();
static AES_192_CBC: AesCbc = AesCbc::aes192();
static AES_256_CBC: AesCbc = AesCbc::aes256();
static AES_256_GCM: Aes256GcmEncryptor = Aes256GcmEncryptor;

impl Cipher {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cipher::Aes128Cbc => "aes-128-cbc",
            Cipher::Aes192Cbc => "aes-192-cbc",
            Cipher::Aes256Cbc => "aes-256-cbc",
            Cipher::Aes256Gcm => "aes-256-gcm",
        }
    }

    /// The algorithm implementing this suite.
    pub fn encryptor(&self) -> &'static dyn Encryptor {
        match self {
            Cipher::Aes128Cbc => &AES_128_CBC,
            Cipher::Aes192Cbc => &AES_192_CBC,
            Cipher::Aes256Cbc => &AES_256_CBC,
            Cipher::Aes256Gcm => &AES_256_GCM,
        }
    }

    pub fn key_size(&self) -> usize {
        self.encryptor().key_size()
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cipher {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aes-128-cbc" => Ok(Cipher::Aes128Cbc),
            "aes-192-cbc" => Ok(Cipher::Aes192Cbc),
            "aes-256-cbc" => Ok(Cipher::Aes256Cbc),
            "aes-256-gcm" => Ok(Cipher::Aes256Gcm),
            other => Err(CacheError::config(format!("Unknown cipher: {}", other))),
        }
    }
}

/// A versioned symmetric key.
///
/// The secret is wiped from memory when the key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    id: u32,
    secret: Vec<u8>,
    size: usize,
}

impl Key {
    /// Create a key for `cipher`, validating the secret length.
    pub fn new(id: u32, secret: impl Into<Vec<u8>>, cipher: Cipher) -> Result<Self> {
        let secret = secret.into();
        let expected = cipher.key_size();
        if secret.len() != expected {
            return Err(CacheError::InvalidSecret {
                id,
                expected,
                got: secret.len(),
            });
        }
        Ok(Self {
            id,
            secret,
            size: expected,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Secret length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
