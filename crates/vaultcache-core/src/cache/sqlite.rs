//! SQLite-based cache backend.
//!
//! One table, lazily expired: rows past `expires_at` are filtered out at
//! read time and stay on disk until they are overwritten, deleted, cleared
//! or removed by [`CacheStore::cleanup`]. There is no background sweeper.

use super::codec::{StoreOptions, ValueCodec};
use super::resilience::try_or;
use super::traits::CacheStore;
use crate::error::{CacheError, Result};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "sqlite";

/// Connection URI selecting a private in-memory database.
pub const IN_MEMORY_URI: &str = ":memory:";

/// Single upsert implementing increment/decrement.
///
/// An existing row past its expiry restarts at the fresh amount instead of
/// continuing from the stale value. SQLite turns an overflowing integer sum
/// into a REAL; the `WHERE` clause skips that update, leaving the row as it
/// was and returning no row.
const COUNTER_UPSERT: &str = r#"
    INSERT INTO cache_store (key, content, expires_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(key) DO UPDATE SET
        content = CASE
            WHEN cache_store.expires_at IS NOT NULL AND cache_store.expires_at < ?4
                THEN excluded.content
            ELSE CAST(cache_store.content AS INTEGER) + excluded.content
        END,
        expires_at = CASE
            WHEN excluded.expires_at IS NOT NULL
                THEN excluded.expires_at
            WHEN cache_store.expires_at IS NOT NULL AND cache_store.expires_at < ?4
                THEN NULL
            ELSE cache_store.expires_at
        END
    WHERE (cache_store.expires_at IS NOT NULL AND cache_store.expires_at < ?4)
        OR typeof(CAST(cache_store.content AS INTEGER) + excluded.content) = 'integer'
    RETURNING content
"#;

/// Current time as fractional unix seconds, the unit of `expires_at`.
fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn expires_at(expires_in: Option<Duration>) -> Option<f64> {
    expires_in.map(|ttl| unix_now() + ttl.as_secs_f64())
}

/// `?, ?, ?` for an `IN (...)` list.
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Counters are stored as SQL integers, everything else as blobs.
fn content_bytes(content: SqlValue) -> Vec<u8> {
    match content {
        SqlValue::Blob(bytes) => bytes,
        SqlValue::Text(text) => text.into_bytes(),
        SqlValue::Integer(n) => n.to_string().into_bytes(),
        SqlValue::Real(f) => f.to_string().into_bytes(),
        SqlValue::Null => Vec::new(),
    }
}

/// SQLite cache backend.
///
/// Thread-safe via internal mutex on the connection. Single statements are
/// atomic; `fetch_multi` spans a select and a reinsert and is not.
pub struct SqliteStore {
    /// Database connection (wrapped for thread safety).
    conn: Arc<Mutex<Connection>>,
    codec: ValueCodec,
}

impl SqliteStore {
    /// Open a store from a connection URI.
    ///
    /// Accepts a filesystem path, [`IN_MEMORY_URI`], or a `file:` URI such
    /// as `file:cache?mode=memory&cache=shared`. Creates the table if it
    /// doesn't exist.
    pub fn open(uri: &str, options: StoreOptions) -> Result<Self> {
        let conn = if uri == IN_MEMORY_URI || uri.starts_with("file:") {
            Connection::open(uri).map_err(|e| CacheError::Database {
                message: format!("Failed to open cache database {}: {}", uri, e),
                source: Some(e),
            })?
        } else {
            return Self::open_path(uri, options);
        };

        Self::from_connection(conn, options)
    }

    /// Open (or create) an on-disk store.
    pub fn open_path(db_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                message: format!("Failed to create cache directory {}: {}", parent.display(), e),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| CacheError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CacheError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::from_connection(conn, options)
    }

    /// Private in-memory store.
    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, options)
    }

    /// Wrap an already-open connection.
    pub fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            codec: ValueCodec::new(options)?,
        };

        store.init_schema()?;

        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_store (
                key TEXT PRIMARY KEY,
                content BLOB NOT NULL,
                expires_at REAL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_store_expires_at
                ON cache_store(expires_at);
            "#,
        )
        .map_err(|e| CacheError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        debug!("Initialized cache_store schema");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CacheError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Live payloads for `keys`, fetched in one statement.
    fn select_live(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            r#"
            SELECT key, content FROM cache_store
            WHERE key IN ({})
              AND (expires_at IS NULL OR expires_at >= ?)
            "#,
            placeholders(keys.len())
        );

        let mut bind: Vec<SqlValue> = keys
            .iter()
            .map(|key| SqlValue::Text(key.to_string()))
            .collect();
        bind.push(SqlValue::Real(unix_now()));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?))
            })?
            .map(|row| row.map(|(key, content)| (key, content_bytes(content))))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(rows)
    }

    /// Insert or replace every row in one transaction.
    fn upsert_all(&self, rows: &[(String, Vec<u8>)], expires_in: Option<Duration>) -> Result<()> {
        let mut conn = self.lock()?;
        let expires_at = expires_at(expires_in);

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO cache_store (key, content, expires_at) VALUES (?1, ?2, ?3)",
            )?;
            for (key, content) in rows {
                stmt.execute(params![key, content, expires_at])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn count(&self, amount: i64, key: &str, expires_in: Option<Duration>) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            COUNTER_UPSERT,
            params![key, amount, expires_at(expires_in), unix_now()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .ok_or_else(|| CacheError::Database {
            message: format!("Counter {} would overflow", key),
            source: None,
        })
    }
}

impl CacheStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn read(&self, key: &str) -> Option<Value> {
        try_or(None, BACKEND, "read", || {
            let conn = self.lock()?;
            let content: Option<SqlValue> = conn
                .query_row(
                    r#"
                    SELECT content FROM cache_store
                    WHERE key = ?1 AND (expires_at IS NULL OR expires_at >= ?2)
                    "#,
                    params![key, unix_now()],
                    |row| row.get(0),
                )
                .optional()?;
            drop(conn);

            content
                .map(|content| self.codec.load(&content_bytes(content)))
                .transpose()
        })
    }

    fn read_multi(&self, keys: &[&str]) -> Vec<(String, Option<Value>)> {
        let rows = try_or(HashMap::new(), BACKEND, "read_multi", || {
            self.select_live(keys)
        });

        keys.iter()
            .map(|key| {
                let value = rows.get(*key).and_then(|bytes| {
                    try_or(None, BACKEND, "read_multi", || self.codec.load(bytes).map(Some))
                });
                (key.to_string(), value)
            })
            .collect()
    }

    fn write(&self, key: &str, value: &Value, expires_in: Option<Duration>) -> bool {
        try_or(false, BACKEND, "write", || {
            let content = self.codec.dump(value)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO cache_store (key, content, expires_at) VALUES (?1, ?2, ?3)",
                params![key, content, expires_at(expires_in)],
            )?;
            Ok(true)
        })
    }

    // All rows are written in one transaction, so a failure writes nothing.
    fn write_multi(&self, entries: &[(String, Value)], expires_in: Option<Duration>) -> bool {
        try_or(false, BACKEND, "write_multi", || {
            let rows = entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.codec.dump(value)?)))
                .collect::<Result<Vec<_>>>()?;
            self.upsert_all(&rows, expires_in)?;
            Ok(true)
        })
    }

    fn delete(&self, key: &str) -> bool {
        try_or(false, BACKEND, "delete", || {
            let conn = self.lock()?;
            let deleted = conn.execute("DELETE FROM cache_store WHERE key = ?1", params![key])?;
            Ok(deleted > 0)
        })
    }

    fn delete_multi(&self, keys: &[&str]) -> usize {
        if keys.is_empty() {
            return 0;
        }

        try_or(0, BACKEND, "delete_multi", || {
            let conn = self.lock()?;
            let sql = format!(
                "DELETE FROM cache_store WHERE key IN ({})",
                placeholders(keys.len())
            );
            Ok(conn.execute(&sql, params_from_iter(keys.iter()))?)
        })
    }

    fn increment(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64 {
        try_or(0, BACKEND, "increment", || self.count(amount, key, expires_in))
    }

    fn decrement(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64 {
        try_or(0, BACKEND, "decrement", || {
            self.count(amount.saturating_neg(), key, expires_in)
        })
    }

    fn exist(&self, key: &str) -> bool {
        try_or(false, BACKEND, "exist", || {
            let conn = self.lock()?;
            let exists = conn
                .query_row(
                    r#"
                    SELECT 1 FROM cache_store
                    WHERE key = ?1 AND (expires_at IS NULL OR expires_at >= ?2)
                    LIMIT 1
                    "#,
                    params![key, unix_now()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            Ok(exists)
        })
    }

    fn clear(&self) -> bool {
        try_or(false, BACKEND, "clear", || {
            let conn = self.lock()?;
            let deleted = conn.execute("DELETE FROM cache_store", [])?;
            debug!("Cleared {} cache entries", deleted);
            Ok(true)
        })
    }

    fn cleanup(&self) -> usize {
        try_or(0, BACKEND, "cleanup", || {
            let conn = self.lock()?;
            let deleted = conn.execute(
                "DELETE FROM cache_store WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![unix_now()],
            )?;
            if deleted > 0 {
                debug!("Cleaned up {} expired cache entries", deleted);
            }
            Ok(deleted)
        })
    }

    /// One batch select for live keys, compute the misses, then write the
    /// whole result set back (hits included) with this call's TTL.
    fn fetch_multi(
        &self,
        keys: &[&str],
        expires_in: Option<Duration>,
        compute: &mut dyn FnMut(&str) -> Value,
    ) -> Vec<(String, Value)> {
        let hits = try_or(HashMap::new(), BACKEND, "fetch_multi", || {
            self.select_live(keys)
        });

        let mut results = Vec::with_capacity(keys.len());
        let mut rows = Vec::with_capacity(keys.len());

        for key in keys {
            let cached = hits.get(*key).and_then(|bytes| {
                try_or(None, BACKEND, "fetch_multi", || self.codec.load(bytes).map(Some))
                    .map(|value| (value, bytes.clone()))
            });

            match cached {
                Some((value, bytes)) => {
                    rows.push((key.to_string(), bytes));
                    results.push((key.to_string(), value));
                }
                None => {
                    let value = compute(key);
                    if let Some(bytes) =
                        try_or(None, BACKEND, "fetch_multi", || self.codec.dump(&value).map(Some))
                    {
                        rows.push((key.to_string(), bytes));
                    }
                    results.push((key.to_string(), value));
                }
            }
        }

        try_or((), BACKEND, "fetch_multi", || self.upsert_all(&rows, expires_in));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Cipher, Keyring};
    use serde_json::json;
    use tempfile::TempDir;

    fn keyring() -> Arc<Keyring> {
        Arc::new(
            Keyring::builder(Cipher::Aes256Gcm)
                .digest_salt("salt")
                .key(0, vec![0x5A; 32])
                .build()
                .unwrap(),
        )
    }

    fn create_test_store() -> SqliteStore {
        SqliteStore::in_memory(StoreOptions::encrypted(keyring())).unwrap()
    }

    fn raw_expires_at(store: &SqliteStore, key: &str) -> Option<f64> {
        store
            .lock()
            .unwrap()
            .query_row(
                "SELECT expires_at FROM cache_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn expire_now(store: &SqliteStore, key: &str) {
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE cache_store SET expires_at = ?1 WHERE key = ?2",
                params![unix_now() - 10.0, key],
            )
            .unwrap();
    }

    fn row_count(store: &SqliteStore) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM cache_store", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let store = create_test_store();
        assert!(store.write("key1", &json!("hello world"), None));
        assert_eq!(store.read("key1"), Some(json!("hello world")));
        assert_eq!(raw_expires_at(&store, "key1"), None);
    }

    #[test]
    fn test_on_disk_store() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/cache.sqlite3");

        {
            let store =
                SqliteStore::open(db_path.to_str().unwrap(), StoreOptions::unencrypted()).unwrap();
            store.write("persisted", &json!([1, 2]), None);
        }

        let store =
            SqliteStore::open(db_path.to_str().unwrap(), StoreOptions::unencrypted()).unwrap();
        assert_eq!(store.read("persisted"), Some(json!([1, 2])));
    }

    #[test]
    fn test_expiration_is_lazy() {
        let store = create_test_store();
        store.write("old", &json!("data"), Some(Duration::from_secs(3600)));
        assert!(store.exist("old"));

        expire_now(&store, "old");

        assert_eq!(store.read("old"), None);
        assert!(!store.exist("old"));
        // Still physically present until cleanup
        assert_eq!(row_count(&store), 1);

        assert_eq!(store.cleanup(), 1);
        assert_eq!(row_count(&store), 0);
    }

    #[test]
    fn test_cleanup_keeps_live_rows() {
        let store = create_test_store();
        store.write("forever", &json!(1), None);
        store.write("later", &json!(2), Some(Duration::from_secs(3600)));
        store.write("gone", &json!(3), Some(Duration::from_secs(3600)));
        expire_now(&store, "gone");

        assert_eq!(store.cleanup(), 1);
        assert!(store.exist("forever"));
        assert!(store.exist("later"));
    }

    #[test]
    fn test_counters() {
        let store = create_test_store();
        assert_eq!(store.increment("c", 1, None), 1);
        assert_eq!(store.increment("c", 5, None), 6);
        assert_eq!(store.decrement("c", 2, None), 4);
        assert_eq!(store.read("c"), Some(json!(4)));
        assert_eq!(store.decrement("fresh", 3, None), -3);
    }

    #[test]
    fn test_counter_overflow_leaves_row() {
        let store = create_test_store();
        assert_eq!(store.increment("c", i64::MAX, None), i64::MAX);
        assert_eq!(store.increment("c", 1, None), 0);
        assert_eq!(store.read("c"), Some(json!(i64::MAX)));

        assert_eq!(store.decrement("low", i64::MAX, None), -i64::MAX);
        assert_eq!(store.decrement("low", 2, None), 0);
        assert_eq!(store.read("low"), Some(json!(-i64::MAX)));
        assert_eq!(store.increment("low", 1, None), 1 - i64::MAX);
    }

    #[test]
    fn test_increment_overwrites_encrypted_value() {
        let store = create_test_store();
        store.write("n", &json!(10), None);
        assert_eq!(store.increment("n", 1, None), 1);
        assert_eq!(store.read("n"), Some(json!(1)));
    }

    #[test]
    fn test_expired_counter_restarts() {
        let store = create_test_store();
        assert_eq!(store.increment("hits", 7, Some(Duration::from_secs(60))), 7);
        expire_now(&store, "hits");

        assert_eq!(store.increment("hits", 2, None), 2);
        // Expired TTL is dropped rather than carried over
        assert_eq!(raw_expires_at(&store, "hits"), None);
    }

    #[test]
    fn test_counter_keeps_live_ttl() {
        let store = create_test_store();
        store.increment("hits", 1, Some(Duration::from_secs(60)));
        let before = raw_expires_at(&store, "hits").unwrap();

        assert_eq!(store.increment("hits", 1, None), 2);
        assert_eq!(raw_expires_at(&store, "hits"), Some(before));
    }

    #[test]
    fn test_read_multi_preserves_request_order() {
        let store = create_test_store();
        store.write("b", &json!("B"), None);
        store.write("a", &json!("A"), None);

        assert_eq!(
            store.read_multi(&["a", "missing", "b"]),
            vec![
                ("a".to_string(), Some(json!("A"))),
                ("missing".to_string(), None),
                ("b".to_string(), Some(json!("B"))),
            ]
        );
    }

    #[test]
    fn test_write_multi_and_delete_multi() {
        let store = create_test_store();
        let entries = vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!({"x": true})),
        ];
        assert!(store.write_multi(&entries, Some(Duration::from_secs(60))));
        assert_eq!(store.read("b"), Some(json!({"x": true})));
        assert!(raw_expires_at(&store, "a").is_some());

        assert_eq!(store.delete_multi(&["a", "b", "c"]), 2);
        assert!(!store.exist("a"));
        assert_eq!(store.delete_multi(&[]), 0);
    }

    #[test]
    fn test_fetch_multi_refreshes_hits() {
        let store = create_test_store();
        store.write("hit", &json!("cached"), None);
        assert_eq!(raw_expires_at(&store, "hit"), None);

        let mut computed = Vec::new();
        let results = store.fetch_multi(&["hit", "miss"], Some(Duration::from_secs(120)), &mut |key| {
            computed.push(key.to_string());
            json!(format!("computed {}", key))
        });

        assert_eq!(computed, vec!["miss".to_string()]);
        assert_eq!(
            results,
            vec![
                ("hit".to_string(), json!("cached")),
                ("miss".to_string(), json!("computed miss")),
            ]
        );
        // Hits are written back with this call's TTL
        assert!(raw_expires_at(&store, "hit").is_some());
        assert_eq!(store.read("miss"), Some(json!("computed miss")));
    }

    #[test]
    fn test_tampered_row_reads_as_miss() {
        let store = create_test_store();
        store.write("k", &json!("v"), None);
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE cache_store SET content = ?1 WHERE key = 'k'",
                params![br#"["AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",0]"#.to_vec()],
            )
            .unwrap();

        assert_eq!(store.read("k"), None);
        assert!(store.exist("k"));
    }

    #[test]
    fn test_failures_are_contained() {
        let store = create_test_store();
        store.write("k", &json!("v"), None);
        store
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE cache_store")
            .unwrap();

        assert_eq!(store.read("k"), None);
        assert_eq!(store.read_multi(&["k"]), vec![("k".to_string(), None)]);
        assert!(!store.write("k", &json!("v"), None));
        assert!(!store.write_multi(&[("k".to_string(), json!(1))], None));
        assert!(!store.delete("k"));
        assert_eq!(store.delete_multi(&["k"]), 0);
        assert_eq!(store.increment("c", 1, None), 0);
        assert_eq!(store.decrement("c", 1, None), 0);
        assert!(!store.exist("k"));
        assert!(!store.clear());
        assert_eq!(store.cleanup(), 0);

        let mut calls = 0;
        let value = store.fetch("k", None, &mut || {
            calls += 1;
            json!("fresh")
        });
        assert_eq!(value, json!("fresh"));
        let results = store.fetch_multi(&["a"], None, &mut |_| json!(0));
        assert_eq!(results, vec![("a".to_string(), json!(0))]);
        assert_eq!(calls, 1);
    }
}
