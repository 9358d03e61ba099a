use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use rec_llm_service::db::{KeyValueStore, MemoryStore};
use rec_llm_service::error::{AppError, AppResult};
use rec_llm_service::messaging::MemoryBus;
use rec_llm_service::services::cache_gateway::CacheGateway;
use rec_llm_service::services::consumer::{MessageOutcome, RequestConsumer};
use rec_llm_service::services::generation::GenerationClient;
use rec_llm_service::services::pipeline::RecommendationPipeline;
use rec_llm_service::services::publisher::{ResultPublisher, Topics};
use rec_llm_service::services::retrieval::{CandidateRetriever, Embedder, MemoryVectorIndex};

/// Embeds by counting a few keywords, enough to rank a tiny catalog
struct KeywordEmbedder;

#[async_trait::async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let count = |word: &str| text.matches(word).count() as f32;
        Ok(vec![count("scifi"), count("drama"), count("comedy")])
    }
}

/// Fails the first `failures` calls, then embeds like [`KeywordEmbedder`]
struct FlakyEmbedder {
    failures: AtomicU32,
}

#[async_trait::async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(AppError::Retrieval("embedding service down".to_string()));
        }
        KeywordEmbedder.embed(text).await
    }
}

struct Service {
    bus: Arc<MemoryBus>,
    store: Arc<MemoryStore>,
    consumer: RequestConsumer,
}

fn service() -> Service {
    service_with(Arc::new(KeywordEmbedder))
}

fn service_with(embedder: Arc<dyn Embedder>) -> Service {
    let mut index = MemoryVectorIndex::new();
    index.insert("m-789", vec![1.0, 0.0, 0.0]);
    index.insert("m-234", vec![0.9, 0.1, 0.0]);
    index.insert("m-555", vec![0.0, 1.0, 0.0]);
    index.insert("m-100", vec![0.0, 0.0, 1.0]);

    let bus = Arc::new(MemoryBus::new("rec.request"));
    let store = Arc::new(MemoryStore::new());
    let cache = CacheGateway::new(store.clone(), 3600);

    let pipeline = RecommendationPipeline::new(
        cache.clone(),
        CandidateRetriever::new(embedder, Arc::new(index), 2),
        GenerationClient::offline(),
        ResultPublisher::new(bus.clone(), cache, Topics::default()),
    );
    let consumer = RequestConsumer::new(bus.clone(), pipeline)
        .with_poll_timeout(Duration::from_millis(10))
        .with_idle_yield(Duration::from_millis(1))
        .with_redelivery_backoff(Duration::from_millis(1));

    Service {
        bus,
        store,
        consumer,
    }
}

fn request(request_id: &str, user_id: &str, ts: i64) -> String {
    format!(
        r#"{{"requestId":"{}","userId":"{}","context":{{"prefs":{{"genres":["scifi"]}},"last_5_watched":["m-1"]}},"ts":{}}}"#,
        request_id, user_id, ts
    )
}

#[tokio::test]
async fn test_request_flows_to_both_topics_and_cache() {
    let svc = service();
    svc.bus.push(request("r1", "u1", 100));

    let outcome = svc.consumer.poll_once().await.unwrap();
    assert_eq!(outcome, Some(MessageOutcome::Processed));

    let raw = svc.bus.published("llm.raw");
    assert_eq!(raw.len(), 1);
    let trace: Value = serde_json::from_str(&raw[0].payload).unwrap();
    assert_eq!(trace["requestId"], "r1");
    assert!(trace["prompt"]
        .as_str()
        .unwrap()
        .contains(r#"Catalog: ["m-789","m-234"]"#));

    let ready = svc.bus.published("rec.ready");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].key, "u1");
    let response: Value = serde_json::from_str(&ready[0].payload).unwrap();
    assert_eq!(response["requestId"], "r1");
    assert_eq!(response["ts"], 100);
    assert_eq!(response["recs"][0]["contentId"], "m-789");

    assert!(svc.store.get("recs:u1").await.unwrap().is_some());
    assert_eq!(svc.bus.acked(), vec![0]);
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let svc = service();
    svc.bus.push(request("r1", "u1", 100));
    svc.bus.push(request("r2", "u1", 200));

    svc.consumer.poll_once().await.unwrap();
    svc.consumer.poll_once().await.unwrap();

    assert_eq!(svc.bus.published("llm.raw").len(), 1);

    let ready = svc.bus.published("rec.ready");
    assert_eq!(ready.len(), 2);
    let first: Value = serde_json::from_str(&ready[0].payload).unwrap();
    let second: Value = serde_json::from_str(&ready[1].payload).unwrap();
    assert_eq!(second["requestId"], "r2");
    assert_eq!(second["ts"], 200);
    assert_eq!(first["recs"], second["recs"]);
}

#[tokio::test]
async fn test_malformed_request_does_not_block_the_topic() {
    let svc = service();
    svc.bus.push(r#"{"requestId":"bad"}"#);
    svc.bus.push(request("r1", "u1", 100));

    let (stop_tx, stop_rx) = watch::channel(false);
    let bus = svc.bus.clone();
    let consumer = svc.consumer;
    let handle = tokio::spawn(async move { consumer.run(stop_rx).await });

    while bus.acked().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(bus.published("rec.ready").len(), 1);
    assert_eq!(bus.pending(), 0);
}

#[tokio::test]
async fn test_failed_request_is_redelivered_before_later_ones_commit() {
    let svc = service_with(Arc::new(FlakyEmbedder {
        failures: AtomicU32::new(1),
    }));
    svc.bus.push(request("r1", "u1", 100));
    svc.bus.push(request("r2", "u2", 200));

    let (stop_tx, stop_rx) = watch::channel(false);
    let bus = svc.bus.clone();
    let consumer = svc.consumer;
    let handle = tokio::spawn(async move { consumer.run(stop_rx).await });

    while bus.committed() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let ready_keys: Vec<String> = bus
        .published("rec.ready")
        .into_iter()
        .map(|record| record.key)
        .collect();
    assert_eq!(ready_keys, vec!["u1", "u2"]);
    assert_eq!(bus.acked(), vec![0, 1]);
}
