//! Error types for vaultcache.
//!
//! Errors fall into four groups:
//! - configuration errors, raised while building keyrings and stores;
//! - integrity errors, raised by the keyring when a ciphertext fails to
//!   authenticate or decode;
//! - backend I/O errors from SQLite, Redis or the coder;
//! - interface misuse such as asking for an unknown key id.
//!
//! Only the first group (and misuse) ever reaches callers of a store. The
//! stores swallow everything else and answer with a benign value.

use thiserror::Error;

/// Main error type for the vaultcache library.
#[derive(Debug, Error)]
pub enum CacheError {
    // Configuration errors
    #[error("Keyring digest salt was never set (use an empty string to opt out explicitly)")]
    MissingDigestSalt,

    #[error("Invalid secret for key {id}: expected {expected} bytes, got {got}")]
    InvalidSecret { id: u32, expected: usize, got: usize },

    #[error("Keyring has no keys")]
    EmptyKeyring,

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Interface misuse
    #[error("Unknown key id: {0}")]
    UnknownKey(u32),

    // Integrity errors
    #[error("Ciphertext failed authentication")]
    Authentication,

    #[error("Cipher error: {message}")]
    Cipher { message: String },

    #[error("Malformed encrypted envelope: {message}")]
    Envelope { message: String },

    // Backend errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Redis error: {message}")]
    Redis {
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Coder error: {message}")]
    Coder { message: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type alias for vaultcache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Redis {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CacheError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::Config {
            message: message.into(),
        }
    }

    /// Check if this error is a construction-time configuration error.
    ///
    /// These are programmer errors: they are raised eagerly and are never
    /// swallowed by the stores.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::MissingDigestSalt
                | CacheError::InvalidSecret { .. }
                | CacheError::EmptyKeyring
                | CacheError::Config { .. }
        )
    }

    /// Check if this error means a stored payload could not be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            CacheError::Authentication | CacheError::Cipher { .. } | CacheError::Envelope { .. }
        )
    }
}
