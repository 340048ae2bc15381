//! Cache store trait and typed helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// The operation contract every backend implements.
///
/// Operations never fail: backend errors are logged and collapse to the
/// documented benign value (`None`, `false`, `0`). Multi-key results follow
/// the order of the requested keys.
pub trait CacheStore: Send + Sync {
    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Read a value. `None` on miss, expiry, failure or tampering.
    ///
    /// Counter payloads are plain integers even in encrypted stores, so a
    /// bare integer planted in the backend is returned as a number rather
    /// than rejected.
    fn read(&self, key: &str) -> Option<Value>;

    /// Read several values, one result per requested key, in request order.
    fn read_multi(&self, keys: &[&str]) -> Vec<(String, Option<Value>)>;

    /// Write a value, replacing any existing entry.
    fn write(&self, key: &str, value: &Value, expires_in: Option<Duration>) -> bool;

    /// Write several values. Whether a failure rolls back earlier entries is
    /// backend-specific.
    fn write_multi(&self, entries: &[(String, Value)], expires_in: Option<Duration>) -> bool;

    /// Delete a key. `true` if an entry was removed.
    fn delete(&self, key: &str) -> bool;

    /// Delete several keys, returning how many entries were removed.
    fn delete_multi(&self, keys: &[&str]) -> usize;

    /// Add `amount` to a counter, creating it at `amount` if missing.
    /// Returns the new value, or 0 on failure.
    ///
    /// Only payloads written by `increment`/`decrement` (or plain integers
    /// in an unencrypted JSON store) count as existing counters. Any other
    /// value under `key` is backend-specific: Memory and SQLite overwrite it
    /// with a counter starting at `amount`, Redis rejects the command and
    /// the call returns 0. Overflow fails the call and leaves the stored
    /// counter unchanged.
    fn increment(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64;

    /// Subtract `amount` from a counter. Returns the new value, or 0 on failure.
    fn decrement(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64;

    /// Whether a live entry exists for `key`.
    fn exist(&self, key: &str) -> bool;

    /// Remove every entry.
    fn clear(&self) -> bool;

    /// Physically remove expired entries the backend still holds.
    fn cleanup(&self) -> usize {
        0
    }

    /// Read `key`, or compute, store and return it on a miss.
    ///
    /// Not atomic: concurrent callers may both compute.
    fn fetch(
        &self,
        key: &str,
        expires_in: Option<Duration>,
        compute: &mut dyn FnMut() -> Value,
    ) -> Value {
        if let Some(value) = self.read(key) {
            return value;
        }
        let value = compute();
        self.write(key, &value, expires_in);
        value
    }

    /// [`fetch`](Self::fetch) for several keys. `compute` runs once per miss.
    fn fetch_multi(
        &self,
        keys: &[&str],
        expires_in: Option<Duration>,
        compute: &mut dyn FnMut(&str) -> Value,
    ) -> Vec<(String, Value)> {
        let mut misses = Vec::new();
        let results: Vec<(String, Value)> = self
            .read_multi(keys)
            .into_iter()
            .map(|(key, cached)| match cached {
                Some(value) => (key, value),
                None => {
                    let value = compute(&key);
                    misses.push((key.clone(), value.clone()));
                    (key, value)
                }
            })
            .collect();

        if !misses.is_empty() {
            self.write_multi(&misses, expires_in);
        }
        results
    }
}

/// Serde conversions on top of any [`CacheStore`].
pub trait TypedCacheExt: CacheStore {
    /// Read and deserialize. A value of the wrong shape reads as a miss.
    fn read_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    fn write_as<T: Serialize>(&self, key: &str, value: &T, expires_in: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.write(key, &value, expires_in),
            Err(e) => {
                warn!("{} cache write of {} failed: {}", self.backend_name(), key, e);
                false
            }
        }
    }

    fn fetch_as<T, F>(&self, key: &str, expires_in: Option<Duration>, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.read_as(key) {
            return value;
        }
        let value = compute();
        self.write_as(key, &value, expires_in);
        value
    }
}

impl<S: CacheStore + ?Sized> TypedCacheExt for S {}
