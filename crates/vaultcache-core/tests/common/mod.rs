//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vaultcache::{
    CacheError, Cipher, ConnectionPool, Keyring, RedisConnection, RedisStore, Result,
    StoreOptions,
};

pub fn keyring(cipher: Cipher) -> Arc<Keyring> {
    let size = cipher.key_size();
    Arc::new(
        Keyring::builder(cipher)
            .digest_salt("integration")
            .key(1, vec![0x42; size])
            .build()
            .unwrap(),
    )
}

pub fn encrypted() -> StoreOptions {
    StoreOptions::encrypted(keyring(Cipher::Aes256Gcm))
}

#[derive(Default)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process stand-in for a Redis database.
#[derive(Default)]
pub struct FakeRedis {
    data: HashMap<String, Entry>,
}

impl FakeRedis {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.data.get(key).is_some_and(|e| !e.live(now)) {
            self.data.remove(key);
        }
        self.data.get_mut(key)
    }

    fn put(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.data.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn counter(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let current = match self.live(key) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CacheError::Redis {
                    message: "ERR value is not an integer or out of range".into(),
                    source: None,
                })?,
            None => 0,
        };
        let next = current + amount;

        let expires_at = match ttl {
            Some(ttl) => Some(Instant::now() + ttl),
            None => self.live(key).and_then(|e| e.expires_at),
        };
        self.data.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }
}

impl RedisConnection for FakeRedis {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key).map(|e| e.value.clone()))
    }

    fn mget(&mut self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.put(key, value.to_vec(), ttl);
        Ok(())
    }

    fn mset(&mut self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.put(key, value.clone(), ttl);
        }
        Ok(())
    }

    fn del(&mut self, keys: &[&str]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.live(key).is_some() {
                self.data.remove(*key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    fn incr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        self.counter(key, amount, ttl)
    }

    fn decr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        self.counter(key, -amount, ttl)
    }

    fn flushdb(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

/// Pool over one shared [`FakeRedis`] that can be taken offline.
#[derive(Clone, Default)]
pub struct FakePool {
    server: Arc<Mutex<FakeRedis>>,
    down: Arc<AtomicBool>,
}

impl FakePool {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Overwrite a raw payload, bypassing the store.
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.server.lock().unwrap().put(key, value.to_vec(), None);
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.server.lock().unwrap().get(key).unwrap()
    }
}

impl ConnectionPool for FakePool {
    type Connection = FakeRedis;

    fn with_connection<T>(&self, f: impl FnOnce(&mut Self::Connection) -> Result<T>) -> Result<T> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Redis {
                message: "Connection refused (os error 111)".into(),
                source: None,
            });
        }
        let mut server = self
            .server
            .lock()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))?;
        f(&mut *server)
    }
}

pub fn redis_store(options: StoreOptions) -> (RedisStore<FakePool>, FakePool) {
    let pool = FakePool::default();
    let store = RedisStore::new(pool.clone(), options).unwrap();
    (store, pool)
}
