//! Versioned keyring with rotation support.
//!
//! The current key is always the one with the highest id. Encryption uses
//! it unless the caller names an id; decryption requires the exact id the
//! payload was encrypted under and never falls back to other keys.

use super::cipher::{Cipher, Key};
use crate::error::{CacheError, Result};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Output of [`Keyring::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    /// Cipher blob (IV/nonce and tag included).
    pub ciphertext: Vec<u8>,
    /// Id of the key that produced `ciphertext`.
    pub key_id: u32,
    /// Salted digest of the plaintext, see [`Keyring::digest`].
    pub digest: String,
}

/// Builder for [`Keyring`].
///
/// The digest salt has no default: leaving it unset is a configuration
/// error, while an empty string is accepted as a deliberate choice.
#[derive(Default)]
pub struct KeyringBuilder {
    cipher: Cipher,
    digest_salt: Option<String>,
    keys: Vec<(u32, Vec<u8>)>,
}

impl KeyringBuilder {
    pub fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            ..Self::default()
        }
    }

    pub fn digest_salt(mut self, salt: impl Into<String>) -> Self {
        self.digest_salt = Some(salt.into());
        self
    }

    pub fn key(mut self, id: u32, secret: impl Into<Vec<u8>>) -> Self {
        self.keys.push((id, secret.into()));
        self
    }

    /// Validate every key and build the keyring.
    pub fn build(self) -> Result<Keyring> {
        let digest_salt = self.digest_salt.ok_or(CacheError::MissingDigestSalt)?;

        let mut keys = BTreeMap::new();
        for (id, secret) in self.keys {
            keys.insert(id, Key::new(id, secret, self.cipher)?);
        }

        Ok(Keyring {
            cipher: self.cipher,
            digest_salt,
            keys: RwLock::new(keys),
        })
    }
}

impl fmt::Debug for KeyringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringBuilder")
            .field("cipher", &self.cipher)
            .field("digest_salt", &self.digest_salt.is_some())
            .field("keys", &self.keys.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .finish()
    }
}

/// Collection of versioned symmetric keys.
///
/// Shared between stores behind an `Arc`; keys may be added or removed at
/// runtime without invalidating ciphertexts of keys that remain.
pub struct Keyring {
    cipher: Cipher,
    digest_salt: String,
    keys: RwLock<BTreeMap<u32, Key>>,
}

impl Keyring {
    pub fn builder(cipher: Cipher) -> KeyringBuilder {
        KeyringBuilder::new(cipher)
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    // Keys stay consistent even if a writer panicked mid-insert, so a
    // poisoned lock is safe to reuse.
    fn keys(&self) -> RwLockReadGuard<'_, BTreeMap<u32, Key>> {
        self.keys.read().unwrap_or_else(|e| e.into_inner())
    }

    fn keys_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<u32, Key>> {
        self.keys.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a key by id.
    pub fn get(&self, id: u32) -> Result<Key> {
        let keys = self.keys();
        if keys.is_empty() {
            return Err(CacheError::EmptyKeyring);
        }
        keys.get(&id).cloned().ok_or(CacheError::UnknownKey(id))
    }

    /// Id of the current (highest) key.
    pub fn current_id(&self) -> Option<u32> {
        self.keys().keys().next_back().copied()
    }

    /// All key ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.keys().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Add or replace a key. A higher id than any present becomes current.
    pub fn add(&self, id: u32, secret: impl Into<Vec<u8>>) -> Result<()> {
        let key = Key::new(id, secret, self.cipher)?;
        self.keys_mut().insert(id, key);
        debug!("Added keyring key {}", id);
        Ok(())
    }

    /// Remove a key. Ciphertexts produced under it stop decrypting.
    pub fn remove(&self, id: u32) -> bool {
        let removed = self.keys_mut().remove(&id).is_some();
        if removed {
            debug!("Removed keyring key {}", id);
        }
        removed
    }

    pub fn clear(&self) {
        self.keys_mut().clear();
        debug!("Cleared keyring");
    }

    /// Encrypt `message` with key `id`, or with the current key if `None`.
    pub fn encrypt(&self, message: &[u8], id: Option<u32>) -> Result<Encrypted> {
        let key = match id {
            Some(id) => self.get(id)?,
            None => {
                let keys = self.keys();
                let current = keys.values().next_back().cloned();
                current.ok_or(CacheError::EmptyKeyring)?
            }
        };

        let ciphertext = self.cipher.encryptor().encrypt(&key, message)?;

        Ok(Encrypted {
            ciphertext,
            key_id: key.id(),
            digest: self.digest(message),
        })
    }

    /// Decrypt `ciphertext` with exactly key `id`.
    pub fn decrypt(&self, ciphertext: &[u8], id: u32) -> Result<Vec<u8>> {
        let key = self.get(id)?;
        self.cipher.encryptor().decrypt(&key, ciphertext)
    }

    /// Decrypt with an old key and encrypt again under the current key.
    ///
    /// Callers use this to migrate values off a key before removing it.
    pub fn reencrypt(&self, ciphertext: &[u8], id: u32) -> Result<Encrypted> {
        let message = self.decrypt(ciphertext, id)?;
        self.encrypt(&message, None)
    }

    /// Hex SHA-1 of `message || digest_salt`.
    ///
    /// Deterministic and independent of the keys, for equality lookups
    /// without decrypting. Not a confidentiality primitive.
    pub fn digest(&self, message: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(message);
        hasher.update(self.digest_salt.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("cipher", &self.cipher)
            .field("ids", &self.ids())
            .finish_non_exhaustive()
    }
}
