//! Configuration for keyrings and cache stores.
//!
//! Everything here deserializes with serde, so it can live in whatever file
//! format the host application already parses. Unknown fields are rejected
//! rather than ignored.

use crate::cache::{
    CacheStore, MemoryStore, NullStore, RedisStore, SqliteStore, StoreOptions, IN_MEMORY_URI,
};
use crate::crypto::{Cipher, Keyring};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Defaults applied when a configuration leaves a field out.
pub struct StoreDefaults;

impl StoreDefaults {
    pub const CIPHER: Cipher = Cipher::Aes256Gcm;
    pub const ENCRYPT: bool = true;
    pub const SQLITE_URI: &'static str = IN_MEMORY_URI;
    pub const REDIS_URL: &'static str = "redis://127.0.0.1:6379/0";
}

fn default_encrypt() -> bool {
    StoreDefaults::ENCRYPT
}

/// Keyring settings.
///
/// ```json
/// {
///   "cipher": "aes-256-gcm",
///   "digest_salt": "",
///   "keys": { "1": "<64 hex chars>" }
/// }
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyringConfig {
    #[serde(default)]
    pub cipher: Cipher,
    /// Must be present; an empty string is allowed.
    #[serde(default)]
    pub digest_salt: Option<String>,
    /// Hex-encoded secrets by key id.
    #[serde(default)]
    pub keys: BTreeMap<u32, String>,
}

impl KeyringConfig {
    /// Decode the secrets and build the keyring.
    pub fn build(&self) -> Result<Keyring> {
        let mut builder = Keyring::builder(self.cipher);
        if let Some(salt) = &self.digest_salt {
            builder = builder.digest_salt(salt.as_str());
        }

        for (id, encoded) in &self.keys {
            let secret = hex::decode(encoded.trim()).map_err(|e| {
                CacheError::config(format!("Secret for key {} is not valid hex: {}", id, e))
            })?;
            builder = builder.key(*id, secret);
        }

        let keyring = builder.build()?;
        debug!(
            "Built {} keyring with {} key(s)",
            keyring.cipher(),
            keyring.len()
        );
        Ok(keyring)
    }
}

impl fmt::Debug for KeyringConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringConfig")
            .field("cipher", &self.cipher)
            .field("digest_salt", &self.digest_salt.as_ref().map(|_| "<set>"))
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Which backend a [`StoreConfig`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
    Redis,
    Null,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Redis => "redis",
            BackendKind::Null => "null",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend selection and options.
///
/// `uri` belongs to `sqlite` and `url` to `redis`; setting either for another
/// backend is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: BackendKind,
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StoreConfig {
    fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            encrypt: StoreDefaults::ENCRYPT,
            uri: None,
            url: None,
        }
    }

    pub fn memory() -> Self {
        Self::new(BackendKind::Memory)
    }

    pub fn sqlite(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::new(BackendKind::Sqlite)
        }
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(BackendKind::Redis)
        }
    }

    pub fn null() -> Self {
        Self::new(BackendKind::Null)
    }

    pub fn unencrypted(mut self) -> Self {
        self.encrypt = false;
        self
    }

    /// Reject options the selected backend does not understand.
    pub fn validate(&self) -> Result<()> {
        if self.uri.is_some() && self.backend != BackendKind::Sqlite {
            return Err(CacheError::config(format!(
                "Option `uri` is not recognised by the {} backend",
                self.backend
            )));
        }
        if self.url.is_some() && self.backend != BackendKind::Redis {
            return Err(CacheError::config(format!(
                "Option `url` is not recognised by the {} backend",
                self.backend
            )));
        }
        Ok(())
    }
}

/// Construct the configured store.
///
/// `keyring` is required unless encryption is turned off (or the backend is
/// `null`, which never stores anything).
pub fn build_store(config: &StoreConfig, keyring: Option<Arc<Keyring>>) -> Result<Box<dyn CacheStore>> {
    config.validate()?;

    let options = StoreOptions {
        encrypt: config.encrypt,
        keyring,
        ..StoreOptions::default()
    };

    let store: Box<dyn CacheStore> = match config.backend {
        BackendKind::Memory => Box::new(MemoryStore::new(options)?),
        BackendKind::Sqlite => {
            let uri = config.uri.as_deref().unwrap_or(StoreDefaults::SQLITE_URI);
            Box::new(SqliteStore::open(uri, options)?)
        }
        BackendKind::Redis => {
            let url = config.url.as_deref().unwrap_or(StoreDefaults::REDIS_URL);
            Box::new(RedisStore::open(url, options)?)
        }
        BackendKind::Null => Box::new(NullStore::new()),
    };

    debug!(
        "Built {} cache store (encrypt: {})",
        store.backend_name(),
        config.encrypt
    );
    Ok(store)
}

/// Top-level cache configuration: one store plus the keyring it encrypts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub store: StoreConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<KeyringConfig>,
}

impl CacheConfig {
    /// Parse from JSON. Malformed input and unknown fields are configuration
    /// errors.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CacheError::config(format!("Invalid cache configuration: {}", e)))
    }

    /// Build the keyring (if any), then the store.
    pub fn build(&self) -> Result<Box<dyn CacheStore>> {
        let keyring = self
            .keyring
            .as_ref()
            .map(KeyringConfig::build)
            .transpose()?
            .map(Arc::new);
        build_store(&self.store, keyring)
    }
}
