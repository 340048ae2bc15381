//! vaultcache - a uniform cache layer with rotatable encryption.
//!
//! One operation contract ([`CacheStore`]) over several backends, with every
//! stored value optionally wrapped in authenticated encryption from a
//! versioned [`Keyring`]. Cache operations never fail: backend errors are
//! logged and answered with a miss, `false` or `0`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vaultcache::{Cipher, Keyring, SqliteStore, StoreOptions, CacheStore, TypedCacheExt};
//!
//! fn main() -> vaultcache::Result<()> {
//!     let keyring = Keyring::builder(Cipher::Aes256Gcm)
//!         .digest_salt("")
//!         .key(1, vec![7u8; 32])
//!         .build()?;
//!
//!     let store = SqliteStore::open("/tmp/cache.sqlite3", StoreOptions::encrypted(Arc::new(keyring)))?;
//!
//!     let greeting: String = store.fetch_as("greeting", Some(Duration::from_secs(60)), || {
//!         "hello".to_string()
//!     });
//!     assert_eq!(greeting, "hello");
//!
//!     store.increment("visits", 1, None);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheStore, Coder, ConnectionPool, JsonCoder, MemoryStore, NullStore, RedisConnection,
    RedisStore, SqliteStore, StoreOptions, TypedCacheExt,
};
pub use config::{build_store, BackendKind, CacheConfig, KeyringConfig, StoreConfig, StoreDefaults};
pub use crypto::{Cipher, Encrypted, Encryptor, Key, Keyring, KeyringBuilder};
pub use error::{CacheError, Result};
