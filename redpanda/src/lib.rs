//! Redpanda/Kafka implementations of the engine's transport and change log
//! contracts.
//!
//! This crate binds the reduction engine to a Kafka-compatible broker using
//! rdkafka. It provides the three capabilities the engine needs:
//!
//! - [`RedpandaBarrierSource`]: consumes barrier events from explicitly
//!   assigned partitions of the input topic
//! - [`RedpandaStatusSink`]: produces status records to the output topic,
//!   keyed by zone
//! - [`RedpandaChangelog`]: backs the occupancy store with a compacted
//!   changelog topic, one broker partition per store partition
//!
//! # Why Redpanda?
//!
//! - **Kafka-compatible**: standard Kafka protocol, works with any
//!   Kafka-compatible system (Redpanda, Apache Kafka, AWS MSK, ...)
//! - **Simpler operations**: easier to deploy and operate than Kafka
//! - **Self-hostable**: Docker, Kubernetes, bare metal
//!
//! # Topic layout
//!
//! ```text
//! carpark-barrier-events    keyed by zone; partition = shard of key space
//! carpark-availability      keyed by zone; one record per processed event
//! carpark-zone-store-changelog
//!                           compacted; key = zone, value = count;
//!                           partition N mirrors store partition N
//! ```
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits: an event's offset is
//! committed only after the event has been handed to the engine, so a
//! crash before the commit redelivers it. The engine's clamp and overshoot
//! policies absorb the resulting duplicates. Ordering is guaranteed within
//! each partition, which is exactly the per-zone ordering the reduction
//! needs when the input topic is keyed by zone.
//!
//! # Example
//!
//! ```no_run
//! use carpark_analyzer_redpanda::{RedpandaBarrierSource, RedpandaChangelog, RedpandaStatusSink};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = RedpandaBarrierSource::builder()
//!     .brokers("localhost:9092")
//!     .topic("carpark-barrier-events")
//!     .group_id("carpark-analyzer")
//!     .build()?;
//!
//! let sink = RedpandaStatusSink::builder()
//!     .brokers("localhost:9092")
//!     .topic("carpark-availability")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let changelog = RedpandaChangelog::builder()
//!     .brokers("localhost:9092")
//!     .topic("carpark-zone-store-changelog")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod changelog;
mod sink;
mod source;

pub use changelog::{RedpandaChangelog, RedpandaChangelogBuilder};
pub use sink::{RedpandaStatusSink, RedpandaStatusSinkBuilder};
pub use source::{RedpandaBarrierSource, RedpandaBarrierSourceBuilder};
