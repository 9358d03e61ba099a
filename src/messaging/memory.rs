use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::messaging::{EventSink, EventSource, InboundMessage};

/// A record appended to an outbound topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub key: String,
    pub payload: String,
}

#[derive(Default)]
struct BusState {
    log: Vec<InboundMessage>,
    /// Offset of the next message handed out by `poll`
    position: i64,
    /// First offset not yet committed
    committed: i64,
    acked: Vec<i64>,
    published: HashMap<String, Vec<PublishedRecord>>,
}

/// Single-partition in-process broker with Kafka offset semantics
///
/// Polling advances a read position. Acknowledging an offset commits it and
/// everything before it. [`MemoryBus::restart`] resumes from the committed
/// offset, as a restarted consumer group member would.
pub struct MemoryBus {
    topic: String,
    state: Mutex<BusState>,
}

impl MemoryBus {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(BusState::default()),
        }
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Broker("bus lock poisoned".to_string()))
    }

    /// Appends a payload to the inbound topic, returning its offset
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let offset = state.log.len() as i64;
        state.log.push(InboundMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            payload: payload.into(),
        });
        offset
    }

    /// Records published to `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<PublishedRecord> {
        self.lock()
            .map(|state| state.published.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Offsets passed to `ack`, in call order
    pub fn acked(&self) -> Vec<i64> {
        self.lock().map(|state| state.acked.clone()).unwrap_or_default()
    }

    /// First offset not yet committed
    pub fn committed(&self) -> i64 {
        self.lock().map(|state| state.committed).unwrap_or_default()
    }

    /// Offsets polled but not yet covered by a commit
    pub fn unacked(&self) -> Vec<i64> {
        self.lock()
            .map(|state| (state.committed..state.position).collect())
            .unwrap_or_default()
    }

    /// Messages at or after the read position
    pub fn pending(&self) -> usize {
        self.lock()
            .map(|state| (state.log.len() as i64 - state.position).max(0) as usize)
            .unwrap_or_default()
    }

    /// Simulates a consumer restart: reading resumes at the committed offset
    pub fn restart(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.position = state.committed;
        }
    }
}

#[async_trait::async_trait]
impl EventSource for MemoryBus {
    async fn poll(&self, timeout: Duration) -> AppResult<Option<InboundMessage>> {
        let next = {
            let mut state = self.lock()?;
            let next = state.log.get(state.position as usize).cloned();
            if next.is_some() {
                state.position += 1;
            }
            next
        };

        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    async fn ack(&self, message: &InboundMessage) -> AppResult<()> {
        let mut state = self.lock()?;
        state.committed = state.committed.max(message.offset + 1);
        state.acked.push(message.offset);
        Ok(())
    }

    async fn rewind(&self, message: &InboundMessage) -> AppResult<()> {
        self.lock()?.position = message.offset;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventSink for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AppResult<()> {
        self.lock()?
            .published
            .entry(topic.to_string())
            .or_default()
            .push(PublishedRecord {
                key: key.to_string(),
                payload: payload.to_string(),
            });
        Ok(())
    }
}
