//! In-process cache backend.

use super::codec::{counter_bytes, parse_counter, StoreOptions, ValueCodec};
use super::resilience::try_or;
use super::traits::CacheStore;
use crate::error::{CacheError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

const BACKEND: &str = "memory";

/// Cache backed by a process-local map.
///
/// Entries never expire: `expires_in` is accepted and ignored. Counters are
/// read-modify-write under the write lock, so they are atomic within one
/// process but not shared across processes.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    codec: ValueCodec,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Result<Self> {
        Self::with_entries(options, HashMap::new())
    }

    /// Create a store pre-populated with already-encoded payloads.
    pub fn with_entries(options: StoreOptions, entries: HashMap<String, Vec<u8>>) -> Result<Self> {
        Ok(Self {
            entries: RwLock::new(entries),
            codec: ValueCodec::new(options)?,
        })
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|e| CacheError::LockPoisoned(format!("memory store: {}", e)))
    }

    fn entries_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|e| CacheError::LockPoisoned(format!("memory store: {}", e)))
    }

    #[cfg(test)]
    fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries().ok()?.get(key).cloned()
    }

    #[cfg(test)]
    fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries_mut() {
            entries.insert(key.to_string(), bytes);
        }
    }
}

impl CacheStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn read(&self, key: &str) -> Option<Value> {
        try_or(None, BACKEND, "read", || {
            let bytes = self.entries()?.get(key).cloned();
            bytes.map(|bytes| self.codec.load(&bytes)).transpose()
        })
    }

    fn read_multi(&self, keys: &[&str]) -> Vec<(String, Option<Value>)> {
        keys.iter()
            .map(|key| (key.to_string(), self.read(key)))
            .collect()
    }

    fn write(&self, key: &str, value: &Value, _expires_in: Option<Duration>) -> bool {
        try_or(false, BACKEND, "write", || {
            let bytes = self.codec.dump(value)?;
            self.entries_mut()?.insert(key.to_string(), bytes);
            Ok(true)
        })
    }

    // Stops at the first failure; entries written before it stay written.
    fn write_multi(&self, entries: &[(String, Value)], expires_in: Option<Duration>) -> bool {
        entries
            .iter()
            .all(|(key, value)| self.write(key, value, expires_in))
    }

    fn delete(&self, key: &str) -> bool {
        try_or(false, BACKEND, "delete", || {
            Ok(self.entries_mut()?.remove(key).is_some())
        })
    }

    fn delete_multi(&self, keys: &[&str]) -> usize {
        try_or(0, BACKEND, "delete_multi", || {
            let mut entries = self.entries_mut()?;
            Ok(keys
                .iter()
                .filter(|key| entries.remove(**key).is_some())
                .count())
        })
    }

    fn increment(&self, key: &str, amount: i64, _expires_in: Option<Duration>) -> i64 {
        try_or(0, BACKEND, "increment", || {
            let mut entries = self.entries_mut()?;
            // Anything that is not a stored counter restarts at zero.
            let current = entries
                .get(key)
                .and_then(|bytes| parse_counter(bytes))
                .unwrap_or(0);
            let next = current.checked_add(amount).ok_or_else(|| CacheError::Coder {
                message: format!("counter {} overflowed", key),
            })?;
            entries.insert(key.to_string(), counter_bytes(next));
            Ok(next)
        })
    }

    fn decrement(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64 {
        self.increment(key, amount.saturating_neg(), expires_in)
    }

    fn exist(&self, key: &str) -> bool {
        try_or(false, BACKEND, "exist", || {
            Ok(self.entries()?.contains_key(key))
        })
    }

    fn clear(&self) -> bool {
        try_or(false, BACKEND, "clear", || {
            self.entries_mut()?.clear();
            Ok(true)
        })
    }
}
