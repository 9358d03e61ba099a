use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use rec_llm_service::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, create_redis_client, KeyValueStore, RedisStore},
    messaging::{KafkaEventSink, KafkaEventSource},
    services::{
        cache_gateway::CacheGateway,
        consumer::RequestConsumer,
        generation::GenerationClient,
        pipeline::RecommendationPipeline,
        publisher::{ResultPublisher, Topics},
        retrieval::CandidateRetriever,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(env = %config.env, "Starting recommendation LLM service");

    let redis_client = create_redis_client(&config.redis_url)?;
    // An unreachable Redis only turns lookups into misses
    let store = Arc::new(RedisStore::connect(redis_client).await);
    let cache = CacheGateway::new(store.clone(), config.cache_ttl_secs);

    let pool = create_pool(&config.database_url)?;
    let retriever = CandidateRetriever::from_config(&config, pool)?;
    let generator = GenerationClient::from_config(&config)?;

    let source = Arc::new(KafkaEventSource::connect(&config)?);
    let sink = Arc::new(KafkaEventSink::connect(&config)?);
    let topics = Topics {
        raw: config.raw_topic.clone(),
        ready: config.ready_topic.clone(),
    };

    let pipeline = RecommendationPipeline::new(
        cache.clone(),
        retriever,
        generator.clone(),
        ResultPublisher::new(sink, cache, topics),
    );
    let consumer = RequestConsumer::new(source, pipeline)
        .with_poll_timeout(config.poll_timeout())
        .with_idle_yield(config.idle_yield())
        .with_redelivery_backoff(config.redelivery_backoff());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_shutdown = shutdown_tx.clone();
    let consumer_task = tokio::spawn(async move {
        let result = consumer.run(shutdown_rx).await;
        // A dead consumer takes the HTTP server down with it
        let _ = consumer_shutdown.send(true);
        result
    });

    let signal_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_shutdown.send(true);
    });

    let app = create_router(AppState::new(generator));
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "HTTP server listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    let consumer_result = consumer_task.await.context("Consumer task panicked")?;

    if let Err(e) = store.disconnect().await {
        tracing::warn!(error = %e, "Redis disconnect failed");
    }

    consumer_result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
