use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::{
    error::{AppError, AppResult},
    messaging::{EventSource, InboundMessage},
    models::RecommendationRequest,
    services::pipeline::{PipelineOutcome, RecommendationPipeline},
};

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Pipeline completed; message acknowledged
    Processed,
    /// Payload could not be decoded; acknowledged and dropped
    Skipped,
    /// Pipeline failed; the source was rewound so the message is read again
    Failed,
}

/// Pull loop over the request topic
///
/// Strictly sequential: a message is fully handled before the next poll.
pub struct RequestConsumer {
    source: Arc<dyn EventSource>,
    pipeline: RecommendationPipeline,
    poll_timeout: Duration,
    idle_yield: Duration,
    redelivery_backoff: Duration,
}

impl RequestConsumer {
    pub fn new(source: Arc<dyn EventSource>, pipeline: RecommendationPipeline) -> Self {
        Self {
            source,
            pipeline,
            poll_timeout: Duration::from_secs(1),
            idle_yield: Duration::from_millis(100),
            redelivery_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_idle_yield(mut self, idle_yield: Duration) -> Self {
        self.idle_yield = idle_yield;
        self
    }

    pub fn with_redelivery_backoff(mut self, backoff: Duration) -> Self {
        self.redelivery_backoff = backoff;
        self
    }

    /// Runs until `shutdown` turns true or the topic connection fails.
    ///
    /// The stop signal is checked between cycles; an in-flight message is
    /// always finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        tracing::info!("Request consumer started");

        while !*shutdown.borrow() {
            let pause = match self.poll_once().await? {
                Some(MessageOutcome::Failed) => self.redelivery_backoff,
                _ => self.idle_yield,
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!("Request consumer stopped");
        Ok(())
    }

    /// One cycle: poll, and handle the message if one arrived.
    ///
    /// Only a failed poll or a failed rewind is an error here; everything
    /// else is contained in the returned [`MessageOutcome`].
    pub async fn poll_once(&self) -> AppResult<Option<MessageOutcome>> {
        let message = match self.source.poll(self.poll_timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::error!(error = %e, "Request topic poll failed");
                return Err(e);
            }
        };

        self.process(&message).await.map(Some)
    }

    /// Per-message failure boundary
    ///
    /// Acks are cumulative, so a failed message must be re-read before any
    /// later offset on its partition is acknowledged.
    async fn process(&self, message: &InboundMessage) -> AppResult<MessageOutcome> {
        let request = match RecommendationRequest::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Dropping malformed request"
                );
                // Redelivery cannot fix a bad payload
                self.ack(message).await;
                return Ok(MessageOutcome::Skipped);
            }
        };

        match self.pipeline.handle(&request).await {
            Ok(outcome) => {
                let source = match outcome {
                    PipelineOutcome::CacheHit(_) => "cache",
                    PipelineOutcome::Generated(_) => "generated",
                };
                tracing::info!(
                    request_id = %request.request_id,
                    user_id = %request.user_id,
                    source,
                    "Request processed"
                );
                self.ack(message).await;
                Ok(MessageOutcome::Processed)
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id,
                    user_id = %request.user_id,
                    offset = message.offset,
                    kind = failure_kind(&e),
                    error = %e,
                    "Request processing failed, will redeliver"
                );
                if let Err(rewind_err) = self.source.rewind(message).await {
                    // Continuing would let a later ack commit past this message
                    tracing::error!(offset = message.offset, error = %rewind_err, "Rewind failed");
                    return Err(rewind_err);
                }
                Ok(MessageOutcome::Failed)
            }
        }
    }

    async fn ack(&self, message: &InboundMessage) {
        if let Err(e) = self.source.ack(message).await {
            // The next successful ack covers this offset too
            tracing::warn!(offset = message.offset, error = %e, "Acknowledgment failed");
        }
    }
}

fn failure_kind(error: &AppError) -> &'static str {
    match error {
        AppError::MalformedInput(_) => "malformed-input",
        AppError::Retrieval(_) | AppError::Database(_) => "retrieval-failure",
        AppError::GenerationFormat(_) => "generation-format",
        AppError::Backend { .. } | AppError::HttpClient(_) => "generation-failure",
        AppError::Broker(_) => "publish-failure",
        AppError::Cache(_) | AppError::Internal(_) => "internal",
    }
}
