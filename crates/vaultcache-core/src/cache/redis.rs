//! Redis cache backend.
//!
//! The store only talks to Redis through two small traits:
//! [`ConnectionPool`] hands out a connection for the duration of one call,
//! and [`RedisConnection`] is the handful of commands the cache needs.
//! `redis::Client` and `redis::Connection` implement them; tests plug in
//! an in-process fake.

use super::codec::{StoreOptions, ValueCodec};
use super::resilience::try_or;
use super::traits::CacheStore;
use crate::error::{CacheError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "redis";

/// TTL in whole milliseconds for `PX`/`PEXPIRE`. Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Commands the cache issues against one Redis connection.
///
/// Multi-key methods must be atomic and return results in key order.
pub trait RedisConnection {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    fn mget(&mut self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>>;

    /// `SET key value [PX ttl]`.
    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    fn mset(&mut self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()>;

    /// Number of keys removed.
    fn del(&mut self, keys: &[&str]) -> Result<usize>;

    fn exists(&mut self, key: &str) -> Result<bool>;

    /// `INCRBY`, followed by `PEXPIRE` in the same transaction when `ttl` is set.
    fn incr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    /// `DECRBY`, followed by `PEXPIRE` in the same transaction when `ttl` is set.
    fn decr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    fn flushdb(&mut self) -> Result<()>;
}

/// Scoped connection acquisition.
pub trait ConnectionPool: Send + Sync {
    type Connection: RedisConnection;

    /// Run `f` with a connection that is released when it returns.
    fn with_connection<T>(&self, f: impl FnOnce(&mut Self::Connection) -> Result<T>) -> Result<T>;
}

impl ConnectionPool for redis::Client {
    type Connection = redis::Connection;

    fn with_connection<T>(&self, f: impl FnOnce(&mut Self::Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.get_connection().map_err(|e| CacheError::Redis {
            message: format!("Failed to connect to redis: {}", e),
            source: Some(e),
        })?;
        f(&mut conn)
    }
}

fn counter_pipeline(
    conn: &mut redis::Connection,
    command: &str,
    key: &str,
    amount: i64,
    ttl: Option<Duration>,
) -> Result<i64> {
    let mut pipe = redis::pipe();
    pipe.atomic().cmd(command).arg(key).arg(amount);
    if let Some(ttl) = ttl {
        pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
    }
    let (value,): (i64,) = pipe.query(conn)?;
    Ok(value)
}

impl RedisConnection for redis::Connection {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(redis::cmd("GET").arg(key).query(self)?)
    }

    fn mget(&mut self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.cmd("GET").arg(*key);
        }
        Ok(pipe.query(self)?)
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query::<()>(self)?;
        Ok(())
    }

    fn mset(&mut self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value.as_slice());
            if let Some(ttl) = ttl {
                pipe.arg("PX").arg(ttl_millis(ttl));
            }
            pipe.ignore();
        }
        pipe.query::<()>(self)?;
        Ok(())
    }

    fn del(&mut self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(redis::cmd("DEL").arg(keys).query(self)?)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(redis::cmd("EXISTS").arg(key).query(self)?)
    }

    fn incr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        counter_pipeline(self, "INCRBY", key, amount, ttl)
    }

    fn decr_by(&mut self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        counter_pipeline(self, "DECRBY", key, amount, ttl)
    }

    fn flushdb(&mut self) -> Result<()> {
        redis::cmd("FLUSHDB").query::<()>(self)?;
        Ok(())
    }
}

/// Cache backend on a remote Redis server.
///
/// Expiry is native (`PX`/`PEXPIRE`). Connectivity problems degrade every
/// operation to its miss value, so `fetch` keeps computing without caching
/// while the server is away.
pub struct RedisStore<P> {
    pool: P,
    codec: ValueCodec,
}

impl RedisStore<redis::Client> {
    /// Store for a `redis://` URL. No connection is made until first use.
    pub fn open(url: &str, options: StoreOptions) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Config {
            message: format!("Invalid redis url {}: {}", url, e),
        })?;
        debug!("Configured redis cache store");
        Self::new(client, options)
    }
}

impl<P: ConnectionPool> RedisStore<P> {
    pub fn new(pool: P, options: StoreOptions) -> Result<Self> {
        Ok(Self {
            pool,
            codec: ValueCodec::new(options)?,
        })
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }
}

impl<P: ConnectionPool> CacheStore for RedisStore<P> {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn read(&self, key: &str) -> Option<Value> {
        try_or(None, BACKEND, "read", || {
            let bytes = self.pool.with_connection(|conn| conn.get(key))?;
            bytes.map(|bytes| self.codec.load(&bytes)).transpose()
        })
    }

    fn read_multi(&self, keys: &[&str]) -> Vec<(String, Option<Value>)> {
        let payloads = try_or(vec![None; keys.len()], BACKEND, "read_multi", || {
            let payloads = self.pool.with_connection(|conn| conn.mget(keys))?;
            if payloads.len() != keys.len() {
                return Err(CacheError::Redis {
                    message: format!(
                        "Expected {} replies to a batched read, got {}",
                        keys.len(),
                        payloads.len()
                    ),
                    source: None,
                });
            }
            Ok(payloads)
        });

        keys.iter()
            .zip(payloads)
            .map(|(key, bytes)| {
                let value = bytes.and_then(|bytes| {
                    try_or(None, BACKEND, "read_multi", || self.codec.load(&bytes).map(Some))
                });
                (key.to_string(), value)
            })
            .collect()
    }

    fn write(&self, key: &str, value: &Value, expires_in: Option<Duration>) -> bool {
        try_or(false, BACKEND, "write", || {
            let bytes = self.codec.dump(value)?;
            self.pool
                .with_connection(|conn| conn.set(key, &bytes, expires_in))?;
            Ok(true)
        })
    }

    fn write_multi(&self, entries: &[(String, Value)], expires_in: Option<Duration>) -> bool {
        try_or(false, BACKEND, "write_multi", || {
            let rows = entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.codec.dump(value)?)))
                .collect::<Result<Vec<_>>>()?;
            self.pool
                .with_connection(|conn| conn.mset(&rows, expires_in))?;
            Ok(true)
        })
    }

    fn delete(&self, key: &str) -> bool {
        try_or(false, BACKEND, "delete", || {
            Ok(self.pool.with_connection(|conn| conn.del(&[key]))? > 0)
        })
    }

    fn delete_multi(&self, keys: &[&str]) -> usize {
        try_or(0, BACKEND, "delete_multi", || {
            self.pool.with_connection(|conn| conn.del(keys))
        })
    }

    fn increment(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64 {
        try_or(0, BACKEND, "increment", || {
            self.pool
                .with_connection(|conn| conn.incr_by(key, amount, expires_in))
        })
    }

    fn decrement(&self, key: &str, amount: i64, expires_in: Option<Duration>) -> i64 {
        try_or(0, BACKEND, "decrement", || {
            self.pool
                .with_connection(|conn| conn.decr_by(key, amount, expires_in))
        })
    }

    fn exist(&self, key: &str) -> bool {
        try_or(false, BACKEND, "exist", || {
            self.pool.with_connection(|conn| conn.exists(key))
        })
    }

    fn clear(&self) -> bool {
        try_or(false, BACKEND, "clear", || {
            self.pool.with_connection(|conn| conn.flushdb())?;
            debug!("Flushed redis cache database");
            Ok(true)
        })
    }
}
