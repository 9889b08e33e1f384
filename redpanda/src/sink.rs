//! Status sink producing availability records keyed by zone.

use carpark_analyzer_core::status::CarParkStatus;
use carpark_analyzer_core::transport::{StatusSink, TransportError};
use carpark_analyzer_core::zone::ZoneId;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-compatible status sink.
///
/// Records are keyed by zone identifier, so a broker that partitions by
/// key keeps the output ordered per zone, matching the ordering of the
/// input the statuses were derived from.
///
/// # Example
///
/// ```no_run
/// use carpark_analyzer_redpanda::RedpandaStatusSink;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = RedpandaStatusSink::builder()
///     .brokers("localhost:9092")
///     .topic("carpark-availability")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaStatusSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaStatusSink {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaStatusSinkBuilder {
        RedpandaStatusSinkBuilder::default()
    }

    /// The topic status records are produced to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for [`RedpandaStatusSink`].
#[derive(Default)]
pub struct RedpandaStatusSinkBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaStatusSinkBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic to produce status records to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all"
    /// (default: "1").
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd"
    /// (default: "none").
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaStatusSink`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if brokers or topic are
    /// not set, or if the producer cannot be created.
    pub fn build(self) -> Result<RedpandaStatusSink, TransportError> {
        let brokers = self
            .brokers
            .ok_or_else(|| TransportError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| TransportError::ConnectionFailed("Topic not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "RedpandaStatusSink created"
        );

        Ok(RedpandaStatusSink {
            producer,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl StatusSink for RedpandaStatusSink {
    fn publish(
        &self,
        zone: &ZoneId,
        status: &CarParkStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let zone = zone.clone();
        let status = *status;
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = status.to_bytes().map_err(|e| TransportError::PublishFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to serialize status: {e}"),
            })?;

            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(zone.as_str().as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition = partition,
                        offset = offset,
                        zone = %zone,
                        status = %status,
                        "Status published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        zone = %zone,
                        error = %kafka_error,
                        "Failed to publish status"
                    );
                    Err(TransportError::PublishFailed {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}
