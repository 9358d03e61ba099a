use std::time::Duration;

use crate::error::AppResult;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaEventSink, KafkaEventSource};
pub use memory::MemoryBus;

/// One event pulled from an inbound topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Consumer side of a topic with explicit acknowledgment
///
/// A message that is polled but never acknowledged may be delivered again.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Waits up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived, or the transport reported a
    /// message-level error. `Err` means the topic connection itself failed.
    async fn poll(&self, timeout: Duration) -> AppResult<Option<InboundMessage>>;

    /// Marks `message` and everything before it on its partition as processed.
    ///
    /// Commits are cumulative, as with Kafka consumer offsets.
    async fn ack(&self, message: &InboundMessage) -> AppResult<()>;

    /// Moves the read position of `message`'s partition back to it, so the
    /// next poll delivers it again
    async fn rewind(&self, message: &InboundMessage) -> AppResult<()>;
}

/// Producer side: append one payload to a topic, waiting for delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AppResult<()>;
}
