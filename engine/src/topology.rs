//! Pipeline shape declaration.
//!
//! A [`Topology`] names the pieces the engine wires together: where barrier
//! events come from, where status records go, and which store (and its
//! change log) the transformer is bound to. It contains no business logic;
//! it exists so the runtime can provision, recover, and rebalance the store
//! without knowing anything about occupancy.

use carpark_analyzer_core::zone::PartitionId;
use std::fmt;
use thiserror::Error;

/// Errors from topology construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A required field was not set on the builder.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The partition count must be at least one.
    #[error("Partition count must be positive")]
    InvalidPartitionCount,
}

/// Declaration of the processing pipeline: source, stateful transform, sink.
///
/// # Example
///
/// ```
/// use carpark_analyzer_engine::topology::Topology;
///
/// let topology = Topology::builder()
///     .source_topic("carpark-barrier-events")
///     .output_topic("carpark-availability")
///     .store_name("carpark-zone-store")
///     .changelog_topic("carpark-zone-store-changelog")
///     .partitions(4)
///     .build()
///     .unwrap();
///
/// assert_eq!(topology.partition_ids().len(), 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    source_topic: String,
    output_topic: String,
    store_name: String,
    changelog_topic: String,
    partitions: u32,
}

impl Topology {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Topic the barrier events are consumed from.
    #[must_use]
    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    /// Topic the status records are produced to.
    #[must_use]
    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    /// Name of the occupancy store the transformer is bound to.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Topic backing the store's durable change log.
    #[must_use]
    pub fn changelog_topic(&self) -> &str {
        &self.changelog_topic
    }

    /// Number of partitions the zone key space is split into.
    #[must_use]
    pub const fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Every partition of the zone key space, in order.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        (0..self.partitions).map(PartitionId::new).collect()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> transform[{}, changelog {}] -> {} ({} partitions)",
            self.source_topic,
            self.store_name,
            self.changelog_topic,
            self.output_topic,
            self.partitions
        )
    }
}

/// Builder for [`Topology`].
#[derive(Default)]
pub struct TopologyBuilder {
    source_topic: Option<String>,
    output_topic: Option<String>,
    store_name: Option<String>,
    changelog_topic: Option<String>,
    partitions: Option<u32>,
}

impl TopologyBuilder {
    /// Set the topic barrier events are consumed from.
    #[must_use]
    pub fn source_topic(mut self, topic: impl Into<String>) -> Self {
        self.source_topic = Some(topic.into());
        self
    }

    /// Set the topic status records are produced to.
    #[must_use]
    pub fn output_topic(mut self, topic: impl Into<String>) -> Self {
        self.output_topic = Some(topic.into());
        self
    }

    /// Set the name of the occupancy store.
    #[must_use]
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    /// Set the topic backing the store's change log.
    #[must_use]
    pub fn changelog_topic(mut self, topic: impl Into<String>) -> Self {
        self.changelog_topic = Some(topic.into());
        self
    }

    /// Set the number of partitions (default: 1).
    #[must_use]
    pub const fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Build the [`Topology`].
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::MissingField`] if a topic or the store name
    /// was not set, or [`TopologyError::InvalidPartitionCount`] if the
    /// partition count is zero.
    pub fn build(self) -> Result<Topology, TopologyError> {
        let source_topic = self
            .source_topic
            .ok_or(TopologyError::MissingField("source_topic"))?;
        let output_topic = self
            .output_topic
            .ok_or(TopologyError::MissingField("output_topic"))?;
        let store_name = self
            .store_name
            .ok_or(TopologyError::MissingField("store_name"))?;
        let changelog_topic = self
            .changelog_topic
            .ok_or(TopologyError::MissingField("changelog_topic"))?;

        let partitions = self.partitions.unwrap_or(1);
        if partitions == 0 {
            return Err(TopologyError::InvalidPartitionCount);
        }

        Ok(Topology {
            source_topic,
            output_topic,
            store_name,
            changelog_topic,
            partitions,
        })
    }
}
