//! Candidate retrieval
//!
//! Turns a user's context into a query embedding and asks a vector index for
//! the nearest stored content. Two seams: [`Embedder`] produces vectors,
//! [`VectorIndex`] answers nearest-neighbor queries. Both must agree on the
//! embedding model, and the index ranks by Euclidean (L2) distance.
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{CandidateSet, RequestContext},
};

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Text to fixed-dimension vector
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Same text, same vector
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Nearest-neighbor search over stored content embeddings
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ids of the `limit` closest items, closest first
    async fn nearest(&self, embedding: &[f32], limit: usize) -> AppResult<Vec<String>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding backend speaking the Ollama `/api/embeddings` protocol
#[derive(Clone)]
pub struct HttpEmbedder {
    http_client: HttpClient,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: String, model: String, dimension: usize) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(EMBEDDING_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            endpoint,
            model,
            dimension,
        })
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let EmbeddingResponse { embedding } = response.json().await?;

        if embedding.len() != self.dimension {
            return Err(AppError::Retrieval(format!(
                "Embedding has dimension {}, expected {}",
                embedding.len(),
                self.dimension
            )));
        }

        Ok(embedding)
    }
}

/// pgvector index over `content_embeddings(content_id, embedding vector(N))`
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Formats a vector as a pgvector text literal, e.g. `[0.1,0.2]`
fn vector_literal(embedding: &[f32]) -> String {
    let values = embedding
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", values)
}

#[async_trait::async_trait]
impl VectorIndex for PgVectorIndex {
    async fn nearest(&self, embedding: &[f32], limit: usize) -> AppResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT content_id
            FROM content_embeddings
            ORDER BY embedding <-> $1::vector
            LIMIT $2
            "#,
        )
        .bind(vector_literal(embedding))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

/// Brute-force in-process index, ranked by Euclidean distance
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorIndex {
    items: Vec<(String, Vec<f32>)>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, content_id: impl Into<String>, embedding: Vec<f32>) {
        self.items.push((content_id.into(), embedding));
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[async_trait::async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn nearest(&self, embedding: &[f32], limit: usize) -> AppResult<Vec<String>> {
        let mut scored: Vec<(f32, &str)> = self
            .items
            .iter()
            .filter(|(_, stored)| stored.len() == embedding.len())
            .map(|(id, stored)| (euclidean_distance(embedding, stored), id.as_str()))
            .collect();

        // Stable sort keeps insertion order among equal distances
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, id)| id.to_string())
            .collect())
    }
}

/// Builds candidate sets for a request context
#[derive(Clone)]
pub struct CandidateRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    limit: usize,
}

impl CandidateRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, limit: usize) -> Self {
        Self {
            embedder,
            index,
            limit,
        }
    }

    /// Wires the HTTP embedder and the pgvector index from configuration
    pub fn from_config(config: &Config, pool: PgPool) -> AppResult<Self> {
        let embedder = HttpEmbedder::new(
            config.embedding_endpoint.clone(),
            config.embedding_model.clone(),
            config.embedding_dim,
        )?;

        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(PgVectorIndex::new(pool)),
            config.candidate_limit,
        ))
    }

    /// Embeds `text` with the configured embedding backend
    pub async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| AppError::Retrieval(format!("embedding failed: {}", e)))
    }

    /// Ids of the `limit` items nearest to `embedding`, closest first
    pub async fn retrieve(&self, embedding: &[f32], limit: usize) -> AppResult<CandidateSet> {
        let mut candidates = self
            .index
            .nearest(embedding, limit)
            .await
            .map_err(|e| AppError::Retrieval(format!("vector index query failed: {}", e)))?;
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Embeds the context's query text and retrieves the configured number
    /// of candidates. Failures are not retried here.
    #[instrument(skip_all)]
    pub async fn candidates_for(&self, context: &RequestContext) -> AppResult<CandidateSet> {
        let query_text = context.query_text();
        let embedding = self.embed(&query_text).await?;
        let candidates = self.retrieve(&embedding, self.limit).await?;

        tracing::info!(
            query = %query_text,
            candidates = candidates.len(),
            "Candidates retrieved"
        );

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext {
            prefs: json!({"genres": ["scifi"]}).as_object().cloned().unwrap(),
            last_5_watched: vec!["m-1".to_string()],
        }
    }

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_index_orders_by_distance() {
        let mut index = MemoryVectorIndex::new();
        index.insert("far", vec![10.0, 10.0]);
        index.insert("near", vec![1.0, 0.0]);
        index.insert("mid", vec![3.0, 3.0]);

        let ids = index.nearest(&[0.0, 0.0], 10).await.unwrap();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn test_memory_index_respects_limit() {
        let mut index = MemoryVectorIndex::new();
        for i in 0..20 {
            index.insert(format!("m-{}", i), vec![i as f32]);
        }

        let ids = index.nearest(&[0.0], 10).await.unwrap();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], "m-0");
        assert_eq!(ids[9], "m-9");
    }

    #[tokio::test]
    async fn test_memory_index_empty() {
        let index = MemoryVectorIndex::new();
        assert!(index.nearest(&[0.0, 1.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_for_embeds_query_text() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .withf(|text: &str| text == "scifi m-1")
            .times(1)
            .returning(|_| Ok(vec![0.1; 384]));

        let mut index = MockVectorIndex::new();
        index
            .expect_nearest()
            .withf(|embedding: &[f32], limit: &usize| embedding.len() == 384 && *limit == 10)
            .times(1)
            .returning(|_, _| Ok(vec!["m-789".to_string(), "m-234".to_string()]));

        let retriever = CandidateRetriever::new(Arc::new(embedder), Arc::new(index), 10);
        let candidates = retriever.candidates_for(&context()).await.unwrap();
        assert_eq!(candidates, vec!["m-789", "m-234"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_retrieval_error() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().times(1).returning(|_| {
            Err(AppError::Backend {
                status: 503,
                body: "down".to_string(),
            })
        });

        let mut index = MockVectorIndex::new();
        index.expect_nearest().never();

        let retriever = CandidateRetriever::new(Arc::new(embedder), Arc::new(index), 10);
        let err = retriever.candidates_for(&context()).await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_index_failure_is_retrieval_error() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.0; 384]));

        let mut index = MockVectorIndex::new();
        index
            .expect_nearest()
            .times(1)
            .returning(|_, _| Err(AppError::Database(sqlx::Error::PoolTimedOut)));

        let retriever = CandidateRetriever::new(Arc::new(embedder), Arc::new(index), 10);
        let err = retriever.candidates_for(&context()).await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_retrieve_truncates_oversized_result() {
        let mut index = MockVectorIndex::new();
        index
            .expect_nearest()
            .returning(|_, _| Ok(vec!["a".into(), "b".into(), "c".into()]));

        let retriever =
            CandidateRetriever::new(Arc::new(MockEmbedder::new()), Arc::new(index), 2);
        let candidates = retriever.retrieve(&[0.0], 2).await.unwrap();
        assert_eq!(candidates, vec!["a", "b"]);
    }
}
