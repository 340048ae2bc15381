//! Uniform cache stores.
//!
//! Every backend implements [`CacheStore`] and shares the same value
//! pipeline ([`codec`]): serialize with a [`Coder`], optionally encrypt with
//! a [`Keyring`](crate::crypto::Keyring), persist the resulting bytes.
//!
//! - [`MemoryStore`]: process-local map, no expiry
//! - [`SqliteStore`]: embedded database with lazy expiry
//! - [`RedisStore`]: remote server with native expiry
//! - [`NullStore`]: never stores anything

pub mod codec;
mod memory;
mod null;
mod redis;
mod resilience;
mod sqlite;
mod traits;

pub use self::codec::{Coder, JsonCoder, StoreOptions, ValueCodec};
pub use self::memory::MemoryStore;
pub use self::null::NullStore;
pub use self::redis::{ConnectionPool, RedisConnection, RedisStore};
pub use self::resilience::try_or;
pub use self::sqlite::{SqliteStore, IN_MEMORY_URI};
pub use self::traits::{CacheStore, TypedCacheExt};
