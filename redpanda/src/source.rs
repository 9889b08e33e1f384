//! Barrier event source over explicitly assigned partitions.

use carpark_analyzer_core::event::BarrierEvent;
use carpark_analyzer_core::transport::{
    BarrierEventSource, BarrierStream, SourceRecord, TransportError,
};
use carpark_analyzer_core::zone::PartitionId;
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use std::future::Future;
use std::pin::Pin;

/// Kafka-compatible barrier event source.
///
/// Unlike a consumer-group subscription, this source takes the partitions
/// it is told to: the engine owns partition assignment, because a store
/// shard must be recovered before its partition is consumed and released
/// when ownership moves. Offsets are still committed under a consumer
/// group, so a re-assigned partition resumes from the last committed
/// position.
///
/// # Example
///
/// ```no_run
/// use carpark_analyzer_redpanda::RedpandaBarrierSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = RedpandaBarrierSource::builder()
///     .brokers("localhost:9092")
///     .topic("carpark-barrier-events")
///     .group_id("carpark-analyzer")
///     .buffer_size(5000)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBarrierSource {
    brokers: String,
    topic: String,
    group_id: String,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBarrierSource {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaBarrierSourceBuilder {
        RedpandaBarrierSourceBuilder::default()
    }

    /// The topic events are consumed from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for [`RedpandaBarrierSource`].
#[derive(Default)]
pub struct RedpandaBarrierSourceBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    group_id: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBarrierSourceBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic to consume barrier events from.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group used for offset commits.
    ///
    /// All engine instances of one deployment share this group so a
    /// re-assigned partition resumes where the previous owner committed.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the event buffer size between the consumer and the engine
    /// (default: 1000).
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where to start when no committed offset exists
    /// (default: "earliest").
    ///
    /// A stateful processor wants the whole log on first start; pass
    /// `"latest"` to skip history instead.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBarrierSource`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if brokers, topic, or
    /// group id are not set.
    pub fn build(self) -> Result<RedpandaBarrierSource, TransportError> {
        let brokers = self
            .brokers
            .ok_or_else(|| TransportError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| TransportError::ConnectionFailed("Topic not configured".to_string()))?;
        let group_id = self.group_id.ok_or_else(|| {
            TransportError::ConnectionFailed("Consumer group not configured".to_string())
        })?;

        let source = RedpandaBarrierSource {
            brokers,
            topic,
            group_id,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %source.brokers,
            topic = %source.topic,
            group_id = %source.group_id,
            buffer_size = source.buffer_size,
            auto_offset_reset = %source.auto_offset_reset,
            "RedpandaBarrierSource created"
        );

        Ok(source)
    }
}

impl BarrierEventSource for RedpandaBarrierSource {
    #[allow(clippy::too_many_lines)] // Complexity required for at-least-once delivery with manual commits
    fn subscribe(
        &self,
        partitions: &[PartitionId],
    ) -> Pin<Box<dyn Future<Output = Result<BarrierStream, TransportError>> + Send + '_>> {
        let partitions = partitions.to_vec();
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let group_id = self.group_id.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            // Manual commits give at-least-once: an offset is committed only
            // after the event has been handed to the engine.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| {
                    TransportError::SubscriptionFailed(format!("Failed to create consumer: {e}"))
                })?;

            // Explicit assignment, not group subscription: the engine owns
            // which partitions this worker consumes.
            let mut assignment = TopicPartitionList::new();
            for partition in &partitions {
                let kafka_partition =
                    i32::try_from(partition.value()).map_err(|_| {
                        TransportError::SubscriptionFailed(format!(
                            "Partition {partition} exceeds broker partition range"
                        ))
                    })?;
                assignment
                    .add_partition_offset(&topic, kafka_partition, Offset::Stored)
                    .map_err(|e| {
                        TransportError::SubscriptionFailed(format!(
                            "Failed to build assignment: {e}"
                        ))
                    })?;
            }
            consumer.assign(&assignment).map_err(|e| {
                TransportError::SubscriptionFailed(format!("Failed to assign partitions: {e}"))
            })?;

            tracing::info!(
                topic = %topic,
                partitions = ?partitions,
                group_id = %group_id,
                "Assigned barrier event partitions"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The spawned task owns the consumer and forwards decoded events.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let item = match message.payload() {
                                Some(payload) => match BarrierEvent::from_bytes(payload) {
                                    Ok(event) => {
                                        tracing::trace!(
                                            partition = message.partition(),
                                            offset = message.offset(),
                                            zone = %event.zone,
                                            "Received barrier event"
                                        );
                                        Ok(SourceRecord {
                                            partition: PartitionId::new(
                                                message.partition().unsigned_abs(),
                                            ),
                                            offset: message.offset().unsigned_abs(),
                                            event,
                                        })
                                    }
                                    Err(e) => Err(TransportError::DeserializationFailed(format!(
                                        "Failed to decode barrier event: {e}"
                                    ))),
                                },
                                None => Err(TransportError::DeserializationFailed(
                                    "Message has no payload".to_string(),
                                )),
                            };

                            // Only commit AFTER the event reached the engine.
                            if tx.send(item).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (event may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err =
                                TransportError::Other(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as BarrierStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBarrierSource>();
        assert_sync::<RedpandaBarrierSource>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaBarrierSource::builder()
            .topic("carpark-barrier-events")
            .group_id("carpark-analyzer")
            .build();
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if build fails
    fn builder_applies_defaults() {
        let source = RedpandaBarrierSource::builder()
            .brokers("localhost:9092")
            .topic("carpark-barrier-events")
            .group_id("carpark-analyzer")
            .build()
            .expect("valid configuration");

        assert_eq!(source.topic(), "carpark-barrier-events");
        assert_eq!(source.buffer_size, 1000);
        assert_eq!(source.auto_offset_reset, "earliest");
    }
}
