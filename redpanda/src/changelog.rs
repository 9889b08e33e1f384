//! Change log backend over a compacted topic.

use carpark_analyzer_core::store::{Changelog, ChangelogRecord, Result, StoreError};
use carpark_analyzer_core::zone::{PartitionId, ZoneId};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Change log backed by a compacted Kafka topic.
///
/// Broker partition N of the changelog topic mirrors store partition N, so
/// the log for a shard moves with the shard. Records are keyed by zone and
/// carry the committed count; compaction keeps roughly the latest record
/// per zone, which is exactly what replay needs.
///
/// Replay reads a partition from its earliest offset to the high
/// watermark observed at the start of the replay. The changelog topic
/// must be created with `cleanup.policy=compact` and at least as many
/// partitions as the store.
///
/// # Example
///
/// ```no_run
/// use carpark_analyzer_redpanda::RedpandaChangelog;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let changelog = RedpandaChangelog::builder()
///     .brokers("localhost:9092")
///     .topic("carpark-zone-store-changelog")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaChangelog {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    send_timeout: Duration,
    replay_timeout: Duration,
}

impl RedpandaChangelog {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaChangelogBuilder {
        RedpandaChangelogBuilder::default()
    }

    /// The topic backing the log.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn kafka_partition(partition: PartitionId) -> Result<i32> {
        i32::try_from(partition.value()).map_err(|_| {
            StoreError::Changelog(format!(
                "partition {partition} exceeds broker partition range"
            ))
        })
    }
}

/// Builder for [`RedpandaChangelog`].
#[derive(Default)]
pub struct RedpandaChangelogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    send_timeout: Option<Duration>,
    replay_timeout: Option<Duration>,
}

impl RedpandaChangelogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the compacted topic backing the log.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the append timeout (default: 5 seconds).
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the per-message replay timeout (default: 10 seconds).
    ///
    /// Replay fails if the broker stops delivering for this long before
    /// the high watermark is reached; a stalled replay must not be
    /// mistaken for a completed one.
    #[must_use]
    pub const fn replay_timeout(mut self, timeout: Duration) -> Self {
        self.replay_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaChangelog`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Changelog`] if brokers or topic are not set,
    /// or if the producer cannot be created.
    pub fn build(self) -> Result<RedpandaChangelog> {
        let brokers = self
            .brokers
            .ok_or_else(|| StoreError::Changelog("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| StoreError::Changelog("Topic not configured".to_string()))?;

        // Appends must be durable before the store moves: full acks, no
        // reordering on retry.
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| StoreError::Changelog(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            "RedpandaChangelog created"
        );

        Ok(RedpandaChangelog {
            producer,
            brokers,
            topic,
            send_timeout: self.send_timeout.unwrap_or(Duration::from_secs(5)),
            replay_timeout: self.replay_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

impl Changelog for RedpandaChangelog {
    fn append(
        &self,
        partition: PartitionId,
        zone: &ZoneId,
        count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let zone = zone.clone();
        let send_timeout = self.send_timeout;

        Box::pin(async move {
            let kafka_partition = Self::kafka_partition(partition)?;
            let payload = bincode::serialize(&count)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            let record = FutureRecord::to(&self.topic)
                .partition(kafka_partition)
                .key(zone.as_str().as_bytes())
                .payload(&payload);

            match self.producer.send(record, Timeout::After(send_timeout)).await {
                Ok((_, offset)) => {
                    tracing::trace!(
                        topic = %self.topic,
                        partition = %partition,
                        offset = offset,
                        zone = %zone,
                        count = count,
                        "Change log record appended"
                    );
                    Ok(offset.unsigned_abs())
                }
                Err((kafka_error, _)) => Err(StoreError::Changelog(format!(
                    "Failed to append to partition {partition}: {kafka_error}"
                ))),
            }
        })
    }

    fn replay(
        &self,
        partition: PartitionId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChangelogRecord>>> + Send + '_>> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let replay_timeout = self.replay_timeout;

        Box::pin(async move {
            let kafka_partition = Self::kafka_partition(partition)?;

            // A throwaway consumer: replay never commits, it always reads
            // the partition front to back.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", format!("{topic}-replay"))
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| StoreError::Changelog(format!("Failed to create consumer: {e}")))?;

            let (low, high) = consumer
                .fetch_watermarks(&topic, kafka_partition, Timeout::After(replay_timeout))
                .map_err(|e| {
                    StoreError::Changelog(format!(
                        "Failed to fetch watermarks for partition {partition}: {e}"
                    ))
                })?;

            if high <= low {
                tracing::info!(
                    topic = %topic,
                    partition = %partition,
                    "Change log partition is empty"
                );
                return Ok(Vec::new());
            }

            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&topic, kafka_partition, Offset::Offset(low))
                .map_err(|e| StoreError::Changelog(format!("Failed to build assignment: {e}")))?;
            consumer
                .assign(&assignment)
                .map_err(|e| StoreError::Changelog(format!("Failed to assign partition: {e}")))?;

            let mut records = Vec::new();
            let mut stream = consumer.stream();

            loop {
                let message = tokio::time::timeout(replay_timeout, futures::StreamExt::next(&mut stream))
                    .await
                    .map_err(|_| {
                        StoreError::Changelog(format!(
                            "Replay of partition {partition} stalled before reaching offset {high}"
                        ))
                    })?
                    .ok_or_else(|| {
                        StoreError::Changelog(format!(
                            "Replay stream for partition {partition} ended unexpectedly"
                        ))
                    })?
                    .map_err(|e| {
                        StoreError::Changelog(format!(
                            "Replay of partition {partition} failed: {e}"
                        ))
                    })?;

                let zone = message
                    .key()
                    .and_then(|key| std::str::from_utf8(key).ok())
                    .map(ZoneId::new)
                    .ok_or_else(|| {
                        StoreError::Serialization(format!(
                            "Change log record at offset {} has no readable zone key",
                            message.offset()
                        ))
                    })?;

                let count: u32 = message
                    .payload()
                    .ok_or_else(|| {
                        StoreError::Serialization(format!(
                            "Change log record at offset {} has no payload",
                            message.offset()
                        ))
                    })
                    .and_then(|payload| {
                        bincode::deserialize(payload)
                            .map_err(|e| StoreError::Serialization(e.to_string()))
                    })?;

                let offset = message.offset();
                records.push(ChangelogRecord {
                    zone,
                    count,
                    offset: offset.unsigned_abs(),
                });

                // The high watermark observed up front bounds the replay;
                // anything appended later belongs to the new owner's writes.
                if offset + 1 >= high {
                    break;
                }
            }

            tracing::info!(
                topic = %topic,
                partition = %partition,
                records = records.len(),
                "Change log partition replayed"
            );

            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changelog_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaChangelog>();
        assert_sync::<RedpandaChangelog>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaChangelog::builder().topic("changelog").build();
        assert!(matches!(result, Err(StoreError::Changelog(_))));
    }

    #[test]
    fn partition_conversion_is_checked() {
        assert!(RedpandaChangelog::kafka_partition(PartitionId::new(3)).is_ok());
        assert!(RedpandaChangelog::kafka_partition(PartitionId::new(u32::MAX)).is_err());
    }
}
