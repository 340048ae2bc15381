//! Always-miss cache backend.

use super::traits::CacheStore;
use serde_json::Value;
use std::time::Duration;

/// A store that never keeps anything.
///
/// Used to force cold-cache code paths: reads always miss, writes report
/// failure and `fetch` runs `compute` on every call. Counters start from
/// zero on every call and are never observable through `read`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl CacheStore for NullStore {
    fn backend_name(&self) -> &'static str {
        "null"
    }

    fn read(&self, _key: &str) -> Option<Value> {
        None
    }

    fn read_multi(&self, keys: &[&str]) -> Vec<(String, Option<Value>)> {
        keys.iter().map(|key| (key.to_string(), None)).collect()
    }

    fn write(&self, _key: &str, _value: &Value, _expires_in: Option<Duration>) -> bool {
        false
    }

    fn write_multi(&self, _entries: &[(String, Value)], _expires_in: Option<Duration>) -> bool {
        false
    }

    fn delete(&self, _key: &str) -> bool {
        false
    }

    fn delete_multi(&self, _keys: &[&str]) -> usize {
        0
    }

    fn increment(&self, _key: &str, amount: i64, _expires_in: Option<Duration>) -> i64 {
        // Transient counter, dropped on return.
        0i64.saturating_add(amount)
    }

    fn decrement(&self, _key: &str, amount: i64, _expires_in: Option<Duration>) -> i64 {
        0i64.saturating_sub(amount)
    }

    fn exist(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) -> bool {
        true
    }

    fn fetch(
        &self,
        _key: &str,
        _expires_in: Option<Duration>,
        compute: &mut dyn FnMut() -> Value,
    ) -> Value {
        compute()
    }

    fn fetch_multi(
        &self,
        keys: &[&str],
        _expires_in: Option<Duration>,
        compute: &mut dyn FnMut(&str) -> Value,
    ) -> Vec<(String, Value)> {
        keys.iter()
            .map(|key| (key.to_string(), compute(key)))
            .collect()
    }
}
