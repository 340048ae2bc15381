//! Best-effort execution of backend calls.

use crate::error::Result;
use tracing::warn;

/// Run `op`, answering `default` if it fails.
///
/// Every store routes its backend interaction through here: the cache is a
/// best-effort layer and callers cannot tell a failed read from a miss.
pub fn try_or<T>(default: T, backend: &str, operation: &str, op: impl FnOnce() -> Result<T>) -> T {
    match op() {
        Ok(value) => value,
        Err(e) => {
            warn!("{} cache {} failed: {}", backend, operation, e);
            default
        }
    }
}
