use std::collections::HashSet;

use tracing::instrument;

use crate::{
    error::AppResult,
    models::{CandidateSet, RecommendationRequest, RecommendationResponse},
    services::{
        cache_gateway::CacheGateway, generation::GenerationClient, prompt,
        publisher::ResultPublisher, retrieval::CandidateRetriever,
    },
};

/// How a request was answered
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Served from cache; only `rec.ready` was emitted
    CacheHit(RecommendationResponse),
    /// Generated, published on both topics and cached
    Generated(RecommendationResponse),
}

/// Drives one request through cache, retrieval, generation and publication
#[derive(Clone)]
pub struct RecommendationPipeline {
    cache: CacheGateway,
    retriever: CandidateRetriever,
    generator: GenerationClient,
    publisher: ResultPublisher,
}

impl RecommendationPipeline {
    pub fn new(
        cache: CacheGateway,
        retriever: CandidateRetriever,
        generator: GenerationClient,
        publisher: ResultPublisher,
    ) -> Self {
        Self {
            cache,
            retriever,
            generator,
            publisher,
        }
    }

    #[instrument(skip_all, fields(request_id = %request.request_id, user_id = %request.user_id))]
    pub async fn handle(&self, request: &RecommendationRequest) -> AppResult<PipelineOutcome> {
        if let Some(cached) = self.cache.lookup(&request.user_id).await {
            // Correlation fields follow the request being answered, not the
            // one that originally filled the cache.
            let response = cached.relabel_for(request);
            self.publisher.publish_cached(&response).await?;
            return Ok(PipelineOutcome::CacheHit(response));
        }

        let candidates = self.retriever.candidates_for(&request.context).await?;

        let prompt_text = prompt::build(
            &request.context.prefs,
            &request.context.last_5_watched,
            &candidates,
        );

        let raw = self.generator.generate(&prompt_text).await?;

        let response = self
            .publisher
            .publish_generated(request, &prompt_text, &raw)
            .await?;

        warn_on_unknown_ids(&response, &candidates);

        Ok(PipelineOutcome::Generated(response))
    }
}

/// Backend output is advisory; ids outside the catalog are reported, not removed
fn warn_on_unknown_ids(response: &RecommendationResponse, candidates: &CandidateSet) {
    let known: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let unknown: Vec<&str> = response
        .recs
        .iter()
        .map(|item| item.content_id.as_str())
        .filter(|id| !known.contains(id))
        .collect();

    if !unknown.is_empty() {
        tracing::warn!(
            unknown = ?unknown,
            "Backend recommended ids outside the candidate set"
        );
    }
}
