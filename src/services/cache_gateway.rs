use std::sync::Arc;

use crate::{
    db::{CacheKey, KeyValueStore},
    models::RecommendationResponse,
};

/// Default lifetime of a cached recommendation (1 hour)
pub const RECOMMENDATION_CACHE_TTL: u64 = 3600;

/// Per-user cache of computed recommendations
///
/// Never fails the caller: a store outage or an undecodable entry reads as a
/// miss, and a failed write is logged and dropped. Concurrent writers for the
/// same user race; the last write wins.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn KeyValueStore>,
    ttl: u64,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: u64) -> Self {
        Self { store, ttl }
    }

    /// Previously computed response for `user_id`, if present and unexpired
    pub async fn lookup(&self, user_id: &str) -> Option<RecommendationResponse> {
        let key = CacheKey::Recommendations(user_id.to_string()).to_string();

        let cached = match self.store.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let json = cached?;
        match serde_json::from_str(&json) {
            Ok(response) => {
                tracing::debug!(user_id = %user_id, "Cache hit");
                Some(response)
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cache entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Overwrites the entry for `user_id` with the configured TTL
    pub async fn store(&self, user_id: &str, response: &RecommendationResponse) {
        let key = CacheKey::Recommendations(user_id.to_string()).to_string();

        let json = match serde_json::to_string(response) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        match self.store.set_ex(&key, &json, self.ttl).await {
            Ok(()) => tracing::debug!(user_id = %user_id, ttl = self.ttl, "Cached recommendations"),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cache write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::MockKeyValueStore;
    use crate::db::MemoryStore;
    use crate::error::AppError;
    use crate::models::RecommendationItem;
    use serde_json::json;
    use std::time::Duration;

    fn response(request_id: &str) -> RecommendationResponse {
        RecommendationResponse {
            request_id: request_id.to_string(),
            user_id: "u1".to_string(),
            recs: vec![RecommendationItem {
                content_id: "m-789".to_string(),
                score: 0.98,
                reason: "Sci-fi thriller".to_string(),
            }],
            ts: json!(100),
        }
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let gateway = CacheGateway::new(Arc::new(MemoryStore::new()), RECOMMENDATION_CACHE_TTL);
        assert_eq!(gateway.lookup("u1").await, None);
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let store = Arc::new(MemoryStore::new());
        let gateway = CacheGateway::new(store.clone(), RECOMMENDATION_CACHE_TTL);

        gateway.store("u1", &response("r1")).await;

        assert_eq!(gateway.lookup("u1").await, Some(response("r1")));
        assert!(store.get("recs:u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let gateway = CacheGateway::new(Arc::new(MemoryStore::new()), RECOMMENDATION_CACHE_TTL);

        gateway.store("u1", &response("r1")).await;
        gateway.store("u1", &response("r2")).await;

        assert_eq!(gateway.lookup("u1").await.unwrap().request_id, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent() {
        let gateway = CacheGateway::new(Arc::new(MemoryStore::new()), RECOMMENDATION_CACHE_TTL);
        gateway.store("u1", &response("r1")).await;

        tokio::time::advance(Duration::from_secs(RECOMMENDATION_CACHE_TTL)).await;

        assert_eq!(gateway.lookup("u1").await, None);
    }

    #[tokio::test]
    async fn test_read_failure_is_forced_miss() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Err(AppError::Internal("connection refused".to_string())));

        let gateway = CacheGateway::new(Arc::new(store), RECOMMENDATION_CACHE_TTL);
        assert_eq!(gateway.lookup("u1").await, None);
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_ex()
            .withf(|key: &str, _value: &str, ttl: &u64| key == "recs:u1" && *ttl == 3600)
            .times(1)
            .returning(|_, _, _| Err(AppError::Internal("connection refused".to_string())));

        let gateway = CacheGateway::new(Arc::new(store), RECOMMENDATION_CACHE_TTL);
        gateway.store("u1", &response("r1")).await;
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("recs:u1", "not json", 60).await.unwrap();

        let gateway = CacheGateway::new(store, RECOMMENDATION_CACHE_TTL);
        assert_eq!(gateway.lookup("u1").await, None);
    }
}
