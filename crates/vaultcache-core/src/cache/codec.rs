//! Value serialization and the optional encryption envelope.
//!
//! Every backend persists one opaque byte string per key:
//!
//! ```text
//! value --coder.dump--> bytes --keyring.encrypt--> ["<base64 ciphertext>", key_id]
//! ```
//!
//! Loading reverses the steps. Counters are the one exception: they are
//! stored as bare decimal integers so that SQL arithmetic and `INCRBY` can
//! operate on them, and they load as JSON numbers without decryption.

use crate::crypto::Keyring;
use crate::error::{CacheError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Pluggable serialization strategy for cached values.
pub trait Coder: Send + Sync {
    fn dump(&self, value: &Value) -> Result<Vec<u8>>;
    fn load(&self, bytes: &[u8]) -> Result<Value>;
}

/// Default coder: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCoder;

impl Coder for JsonCoder {
    fn dump(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Outer `[ciphertext, key_id]` tuple.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope(String, u32);

/// Parse a payload written by a counter operation.
pub(crate) fn parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Encode a counter the way every backend stores it.
pub(crate) fn counter_bytes(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Serialize `value` with `coder`, then encrypt it when a keyring is given.
pub fn dump(coder: &dyn Coder, keyring: Option<&Keyring>, value: &Value) -> Result<Vec<u8>> {
    let plain = coder.dump(value)?;
    let Some(keyring) = keyring else {
        return Ok(plain);
    };

    let encrypted = keyring.encrypt(&plain, None)?;
    let envelope = Envelope(STANDARD.encode(&encrypted.ciphertext), encrypted.key_id);
    Ok(serde_json::to_vec(&envelope)?)
}

/// Reverse of [`dump`].
///
/// Without a keyring the coder always sees the payload first; a bare
/// integer only loads as a counter when the coder rejects it. With a
/// keyring, a bare integer is taken as a counter before decryption. Counter
/// payloads are never encrypted, so they are not authenticated either: a
/// forged integer in the backend reads back as that number.
pub fn load(coder: &dyn Coder, keyring: Option<&Keyring>, bytes: &[u8]) -> Result<Value> {
    let Some(keyring) = keyring else {
        return coder
            .load(bytes)
            .or_else(|e| parse_counter(bytes).map(Value::from).ok_or(e));
    };

    if let Some(counter) = parse_counter(bytes) {
        return Ok(Value::from(counter));
    }

    let Envelope(ciphertext, key_id) =
        serde_json::from_slice(bytes).map_err(|e| CacheError::Envelope {
            message: e.to_string(),
        })?;
    let ciphertext = STANDARD
        .decode(ciphertext)
        .map_err(|e| CacheError::Envelope {
            message: format!("Invalid base64 ciphertext: {}", e),
        })?;

    let plain = keyring.decrypt(&ciphertext, key_id)?;
    coder.load(&plain)
}

/// The coder and (optional) keyring a store was built with.
#[derive(Clone)]
pub struct ValueCodec {
    coder: Arc<dyn Coder>,
    keyring: Option<Arc<Keyring>>,
}

impl ValueCodec {
    /// Build from store options.
    ///
    /// Enabling encryption without a keyring, or with an empty one, is a
    /// configuration error.
    pub fn new(options: StoreOptions) -> Result<Self> {
        let keyring = if options.encrypt {
            match options.keyring {
                Some(keyring) if !keyring.is_empty() => Some(keyring),
                _ => return Err(CacheError::EmptyKeyring),
            }
        } else {
            None
        };

        Ok(Self {
            coder: options.coder,
            keyring,
        })
    }

    pub fn encrypts(&self) -> bool {
        self.keyring.is_some()
    }

    pub fn dump(&self, value: &Value) -> Result<Vec<u8>> {
        dump(self.coder.as_ref(), self.keyring.as_deref(), value)
    }

    pub fn load(&self, bytes: &[u8]) -> Result<Value> {
        load(self.coder.as_ref(), self.keyring.as_deref(), bytes)
    }
}

/// Construction options shared by every backend.
#[derive(Clone)]
pub struct StoreOptions {
    /// Serialization strategy (default: [`JsonCoder`]).
    pub coder: Arc<dyn Coder>,
    /// Wrap stored values in the keyring's encryption (default: true).
    pub encrypt: bool,
    pub keyring: Option<Arc<Keyring>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            coder: Arc::new(JsonCoder),
            encrypt: true,
            keyring: None,
        }
    }
}

impl StoreOptions {
    /// Encrypted storage with `keyring`.
    pub fn encrypted(keyring: Arc<Keyring>) -> Self {
        Self {
            keyring: Some(keyring),
            ..Self::default()
        }
    }

    /// Plain storage, values only pass through the coder.
    pub fn unencrypted() -> Self {
        Self {
            encrypt: false,
            ..Self::default()
        }
    }

    pub fn with_coder(mut self, coder: Arc<dyn Coder>) -> Self {
        self.coder = coder;
        self
    }
}
