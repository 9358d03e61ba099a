use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::messaging::{EventSink, EventSource, InboundMessage};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

impl From<KafkaError> for AppError {
    fn from(e: KafkaError) -> Self {
        AppError::Broker(e.to_string())
    }
}

/// Kafka consumer for the request topic
///
/// Auto-commit is off. Offsets are committed only through
/// [`EventSource::ack`], and a failed message is re-read through
/// [`EventSource::rewind`] before any later offset can be committed.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
}

impl KafkaEventSource {
    /// Joins the configured consumer group and subscribes to the request topic
    pub fn connect(config: &Config) -> AppResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("group.id", &config.kafka_group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()?;

        consumer.subscribe(&[config.request_topic.as_str()])?;

        tracing::info!(
            topic = %config.request_topic,
            group = %config.kafka_group_id,
            "Subscribed to request topic"
        );

        Ok(Self { consumer })
    }
}

#[async_trait::async_trait]
impl EventSource for KafkaEventSource {
    async fn poll(&self, timeout: Duration) -> AppResult<Option<InboundMessage>> {
        let received = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };

        match received {
            Ok(message) => Ok(Some(InboundMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(KafkaError::MessageConsumption(code)) => {
                tracing::warn!(error = %code, "Message-level consume error, skipping");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ack(&self, message: &InboundMessage) -> AppResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn rewind(&self, message: &InboundMessage) -> AppResult<()> {
        self.consumer.seek(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset),
            SEEK_TIMEOUT,
        )?;
        tracing::debug!(
            partition = message.partition,
            offset = message.offset,
            "Rewound partition for redelivery"
        );
        Ok(())
    }
}

/// Kafka producer for the outbound topics
#[derive(Clone)]
pub struct KafkaEventSink {
    producer: FutureProducer,
}

impl KafkaEventSink {
    pub fn connect(config: &Config) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }
}

#[async_trait::async_trait]
impl EventSink for KafkaEventSink {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AppResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(e, _)| AppError::Broker(format!("delivery to {} failed: {}", topic, e)))?;

        tracing::debug!(topic = %topic, key = %key, "Event published");
        Ok(())
    }
}
