use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::db::store::KeyValueStore;
use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Recommendations(String),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations(user_id) => write!(f, "recs:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Longest a single connection attempt may hold up a cache call
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum spacing between connection attempts while Redis is unreachable
const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Default)]
struct ConnState {
    manager: Option<ConnectionManager>,
    last_failure: Option<Instant>,
    closed: bool,
}

/// Redis-backed [`KeyValueStore`]
///
/// Connects lazily. While Redis is unreachable every call fails fast, so
/// callers see a miss; a new attempt is made at most once per
/// [`RECONNECT_INTERVAL`]. Once established, the connection manager
/// reconnects on its own.
pub struct RedisStore {
    client: Client,
    state: Mutex<ConnState>,
}

impl RedisStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Creates the store and makes a first connection attempt.
    ///
    /// An unreachable server is logged, not returned.
    pub async fn connect(client: Client) -> Self {
        let store = Self::new(client);
        match store.connection().await {
            Ok(_) => tracing::info!("Connected to Redis"),
            Err(e) => tracing::warn!(error = %e, "Redis unavailable, cache lookups will miss until it recovers"),
        }
        store
    }

    async fn connection(&self) -> AppResult<ConnectionManager> {
        let mut state = self.state.lock().await;

        if state.closed {
            return Err(AppError::Internal("Redis connection already closed".to_string()));
        }
        if let Some(manager) = &state.manager {
            return Ok(manager.clone());
        }
        if let Some(failed_at) = state.last_failure {
            if failed_at.elapsed() < RECONNECT_INTERVAL {
                return Err(AppError::Internal("Redis unavailable".to_string()));
            }
        }

        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(self.client.clone())).await;
        match attempt {
            Ok(Ok(manager)) => {
                if state.last_failure.take().is_some() {
                    tracing::info!("Reconnected to Redis");
                }
                state.manager = Some(manager.clone());
                Ok(manager)
            }
            Ok(Err(e)) => {
                state.last_failure = Some(Instant::now());
                Err(e.into())
            }
            Err(_) => {
                state.last_failure = Some(Instant::now());
                Err(AppError::Internal("Redis connection attempt timed out".to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(cached)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        if state.manager.take().is_some() {
            tracing::info!("Redis connection closed");
        }
        Ok(())
    }
}
