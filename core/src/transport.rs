//! Transport contracts: the barrier event source and the status sink.
//!
//! The engine does not talk to a broker directly; it consumes an ordered,
//! partitioned stream of [`BarrierEvent`]s through [`BarrierEventSource`]
//! and emits [`CarParkStatus`] records through [`StatusSink`]. The external
//! streaming substrate behind these traits provides at-least-once delivery
//! and per-partition ordering; the engine relies on those guarantees but
//! does not reimplement them.
//!
//! ```text
//! ┌──────────────┐ SourceRecord ┌──────────────┐ (zone, status) ┌────────────┐
//! │ Event Source │─────────────►│    Engine    │───────────────►│ Status Sink│
//! │ (partitioned)│  per-zone    │ (stateful    │  one record    │ (keyed by  │
//! └──────────────┘  order       │  reduction)  │  per event     │  zone)     │
//!                               └──────────────┘                └────────────┘
//! ```
//!
//! # Delivery semantics
//!
//! - **At-least-once**: the same event may be delivered twice; the
//!   reduction step tolerates duplicates (clamp at zero, capped overshoot).
//! - **Ordered within a partition**: events for the same zone arrive in the
//!   order they were produced. No ordering holds across partitions.
//!
//! # Dyn Compatibility
//!
//! Both traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` to enable trait object usage (`Arc<dyn BarrierEventSource>`,
//! `Arc<dyn StatusSink>`), which the engine needs to accept any transport
//! implementation as a capability.

use crate::event::BarrierEvent;
use crate::status::CarParkStatus;
use crate::zone::{PartitionId, ZoneId};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur at the transport boundary.
///
/// Per the propagation policy, transport failures are not recovered
/// per-event: they surface to the engine's fault handler, which stops the
/// engine cleanly rather than continue with a partially-working pipeline.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Failed to reach the external substrate.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to the requested partitions.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Failed to publish a status record.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// A delivered payload could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The substrate reported a delivery or commit failure.
    #[error("Transport error: {0}")]
    Other(String),
}

/// One delivered event, tagged with where it sits in the log.
///
/// The partition and offset identify the record's position for logging and
/// diagnostics; the engine's correctness does not depend on inspecting
/// them, only on the per-partition delivery order of the stream itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRecord {
    /// The partition this event was delivered on.
    pub partition: PartitionId,
    /// Offset of the event within its partition.
    pub offset: u64,
    /// The barrier event itself.
    pub event: BarrierEvent,
}

/// Stream of delivered events for a set of partitions.
///
/// Each item is a `Result`: `Ok` carries a decoded event, `Err` a
/// transport-level failure. The stream ends when the subscription is torn
/// down.
pub type BarrierStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SourceRecord, TransportError>> + Send>>;

/// Source of barrier events for explicitly assigned partitions.
///
/// The engine — not the substrate's group protocol — decides which
/// partitions a worker owns, so subscription is by explicit partition list.
/// Within each subscribed partition, events are delivered strictly in
/// order.
pub trait BarrierEventSource: Send + Sync {
    /// Subscribe to the given partitions and receive their event stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        partitions: &[PartitionId],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<BarrierStream, TransportError>> + Send + '_>>;
}

/// Sink for derived status records, keyed by zone.
///
/// One record is published per processed input event. Keying by zone keeps
/// the output stream ordered per zone when the substrate partitions by key.
pub trait StatusSink: Send + Sync {
    /// Publish a status record for a zone.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the record cannot be
    /// delivered.
    fn publish(
        &self,
        zone: &ZoneId,
        status: &CarParkStatus,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), TransportError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = TransportError::PublishFailed {
            topic: "carpark-status".to_string(),
            reason: "broker unavailable".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Publish failed for topic 'carpark-status': broker unavailable"
        );
    }
}
