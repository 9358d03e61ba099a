use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, AppResult};

/// Key-value store with per-entry expiry
///
/// Implementations are connected at construction and released with
/// [`KeyValueStore::disconnect`]. Values are opaque strings; callers own the
/// encoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key` unless it is missing or expired
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous entry, for `ttl_secs`
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;

    /// Releases the underlying connection. Later calls fail.
    async fn disconnect(&self) -> AppResult<()>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local store used by tests and single-node local runs
///
/// Expiry is checked on read against the tokio clock, so paused-time tests
/// can advance past a TTL deterministically.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Time left before `key` expires, if it is present
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    fn ensure_connected(&self) -> AppResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AppError::Internal("store is disconnected".to_string()))
        }
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.ensure_connected()?;
        let mut entries = self.lock()?;

        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        self.ensure_connected()?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}
