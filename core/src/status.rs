//! Car park status records, the output of the reduction engine.
//!
//! A [`CarParkStatus`] is derived from the occupancy counter and the
//! capacity entry at the moment an event is processed; it has no lifecycle
//! of its own and is never stored. The availability is a tagged variant,
//! not a loosely typed value: a consumer matching on [`Status`] is forced
//! to handle both the numeric count and the `FULL` marker.

use crate::capacity::ZoneType;
use crate::event::EventError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of a zone: a numeric occupancy or the `FULL` marker.
///
/// `Full` is emitted exactly when occupancy has reached the zone's total
/// capacity; any occupancy below that renders as a plain count.
///
/// # Examples
///
/// ```
/// use carpark_analyzer_core::status::Status;
///
/// assert_eq!(format!("{}", Status::Count(7)), "7");
/// assert_eq!(format!("{}", Status::Full), "FULL");
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Current occupancy, strictly below capacity.
    Count(u32),
    /// Occupancy has reached capacity.
    Full,
}

impl Status {
    /// Whether this status is the `FULL` marker.
    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Full => write!(f, "FULL"),
        }
    }
}

/// Derived availability record for one zone, emitted per processed event.
///
/// Output records are keyed by zone on the status stream; the record body
/// carries the zone type (stable numeric id on the wire) and the
/// availability at the moment of processing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarParkStatus {
    /// The kind of parking the zone offers.
    pub zone_type: ZoneType,
    /// Availability at the moment the triggering event was applied.
    pub status: Status,
}

impl CarParkStatus {
    /// Create a status record.
    #[must_use]
    pub const fn new(zone_type: ZoneType, status: Status) -> Self {
        Self { zone_type, status }
    }

    /// Serialize this record to bincode bytes for the output stream.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize a record from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are
    /// corrupted or encode a different type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for CarParkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type {} status {}", self.zone_type.type_id(), self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_marker() {
        assert!(Status::Full.is_full());
        assert!(!Status::Count(0).is_full());
        assert!(!Status::Count(99).is_full());
    }

    #[test]
    fn display() {
        let status = CarParkStatus::new(ZoneType::Shift, Status::Full);
        assert_eq!(format!("{status}"), "type 1 status FULL");

        let status = CarParkStatus::new(ZoneType::General, Status::Count(3));
        assert_eq!(format!("{status}"), "type 0 status 3");
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn serialization_roundtrip() {
        let original = CarParkStatus::new(ZoneType::Reserved, Status::Count(12));
        let bytes = original.to_bytes().expect("serialization should succeed");
        let decoded = CarParkStatus::from_bytes(&bytes).expect("deserialization should succeed");
        assert_eq!(original, decoded);
    }
}
