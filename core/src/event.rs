//! Barrier crossing events, the input to the reduction engine.
//!
//! A [`BarrierEvent`] is one physical crossing of an entry or exit barrier.
//! Events are immutable facts; they are keyed by zone so the external
//! transport can guarantee per-zone delivery order.
//!
//! # Wire format
//!
//! Events are serialized with `bincode` for a compact binary representation.
//! The upstream sensors deliver at-least-once, so the same event may be
//! observed twice; the reduction step is written to tolerate that.
//!
//! # Example
//!
//! ```
//! use carpark_analyzer_core::event::{BarrierEvent, Direction};
//! use carpark_analyzer_core::zone::ZoneId;
//! use chrono::Utc;
//!
//! let event = BarrierEvent::new(ZoneId::new("zone-a"), Direction::Entry, Utc::now());
//! let bytes = event.to_bytes().unwrap();
//! let decoded = BarrierEvent::from_bytes(&bytes).unwrap();
//! assert_eq!(event, decoded);
//! ```

use crate::zone::ZoneId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for event serialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// The direction of a barrier crossing.
///
/// `Entry` raises the zone's occupancy by one; `Exit` lowers it by one,
/// floored at zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// A vehicle entered the zone.
    Entry,
    /// A vehicle left the zone.
    Exit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "ENTRY"),
            Self::Exit => write!(f, "EXIT"),
        }
    }
}

/// One barrier crossing for a zone.
///
/// Events arrive on the input stream keyed by [`ZoneId`]; many events
/// reference the same zone, unordered across zones but ordered within a
/// zone by delivery order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarrierEvent {
    /// The zone whose barrier fired.
    pub zone: ZoneId,
    /// Whether the vehicle entered or left.
    pub direction: Direction,
    /// When the crossing happened.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the physical barrier, when the sensor reports one.
    pub barrier_id: Option<String>,
}

impl BarrierEvent {
    /// Create a new event with no barrier identifier.
    #[must_use]
    pub const fn new(zone: ZoneId, direction: Direction, timestamp: DateTime<Utc>) -> Self {
        Self {
            zone,
            direction,
            timestamp,
            barrier_id: None,
        }
    }

    /// Attach the identifier of the physical barrier that produced the event.
    #[must_use]
    pub fn with_barrier_id(mut self, barrier_id: impl Into<String>) -> Self {
        self.barrier_id = Some(barrier_id.into());
        self
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be
    /// serialized. This is rare with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are
    /// corrupted or encode a different type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for BarrierEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.direction, self.zone, self.timestamp)
    }
}
