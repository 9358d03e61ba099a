use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    messaging::EventSink,
    models::{RawTraceEvent, RecommendationItem, RecommendationRequest, RecommendationResponse},
    services::cache_gateway::CacheGateway,
};

/// Outbound topic names
#[derive(Debug, Clone)]
pub struct Topics {
    pub raw: String,
    pub ready: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            raw: "llm.raw".to_string(),
            ready: "rec.ready".to_string(),
        }
    }
}

/// Emits pipeline results downstream and keeps the cache current
///
/// Events are keyed by user id so one user's events land on one partition.
#[derive(Clone)]
pub struct ResultPublisher {
    sink: Arc<dyn EventSink>,
    cache: CacheGateway,
    topics: Topics,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn EventSink>, cache: CacheGateway, topics: Topics) -> Self {
        Self {
            sink,
            cache,
            topics,
        }
    }

    /// Publishes a freshly generated result
    ///
    /// Parses `raw` first: malformed backend output fails before anything is
    /// emitted. Then emits `llm.raw`, `rec.ready` and writes the cache, in
    /// that order.
    pub async fn publish_generated(
        &self,
        request: &RecommendationRequest,
        prompt: &str,
        raw: &str,
    ) -> AppResult<RecommendationResponse> {
        let recs = RecommendationItem::parse_list(raw)?;

        let trace = RawTraceEvent {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            prompt: prompt.to_string(),
            response: raw.to_string(),
            ts: request.ts.clone(),
        };
        self.emit(&self.topics.raw, &request.user_id, &trace).await?;

        let response = RecommendationResponse {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            recs,
            ts: request.ts.clone(),
        };
        self.emit(&self.topics.ready, &request.user_id, &response)
            .await?;

        self.cache.store(&request.user_id, &response).await;

        tracing::info!(
            request_id = %request.request_id,
            user_id = %request.user_id,
            recs = response.recs.len(),
            "Published generated recommendations"
        );

        Ok(response)
    }

    /// Republishes a cached result on `rec.ready` only
    pub async fn publish_cached(&self, response: &RecommendationResponse) -> AppResult<()> {
        self.emit(&self.topics.ready, &response.user_id, response)
            .await?;

        tracing::info!(
            request_id = %response.request_id,
            user_id = %response.user_id,
            "Republished cached recommendations"
        );

        Ok(())
    }

    async fn emit<T: serde::Serialize>(&self, topic: &str, key: &str, event: &T) -> AppResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("Event serialization error: {}", e)))?;
        self.sink.publish(topic, key, &payload).await
    }
}
