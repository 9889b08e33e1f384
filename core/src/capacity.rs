//! Zone capacity configuration.
//!
//! The capacity table is a static, slowly-changing mapping from zone to
//! (total capacity, zone type). It is supplied at process start and treated
//! as an immutable snapshot for the lifetime of the engine: workers share it
//! behind an `Arc` with no locking, and any refresh mechanism swaps in a new
//! snapshot from outside.
//!
//! Every zone referenced by a barrier event must have an entry here before
//! the engine processes its first event; a missing entry is a data-quality
//! error ([`UnknownZoneError`]), not a signal to discover capacity lazily.
//!
//! # Example
//!
//! ```
//! use carpark_analyzer_core::capacity::{CapacityTable, ZoneCapacity, ZoneType};
//! use carpark_analyzer_core::zone::ZoneId;
//!
//! let table: CapacityTable = [
//!     (ZoneId::new("zone-a"), ZoneCapacity::new(120, ZoneType::General)),
//!     (ZoneId::new("zone-b"), ZoneCapacity::new(30, ZoneType::Reserved)),
//! ]
//! .into_iter()
//! .collect();
//!
//! let entry = table.capacity_of(&ZoneId::new("zone-a")).unwrap();
//! assert_eq!(entry.total, 120);
//! assert!(table.capacity_of(&ZoneId::new("zone-z")).is_err());
//! ```

use crate::zone::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error returned when an event references a zone absent from the capacity table.
///
/// Recovered locally: the offending event is dropped and reported on the
/// anomaly channel; processing of other zones continues unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown zone: {zone}")]
pub struct UnknownZoneError {
    /// The zone the event referenced.
    pub zone: ZoneId,
}

/// The kind of parking a zone offers.
///
/// Each variant carries a stable numeric identifier used on the output
/// stream (`GENERAL = 0`, `SHIFT = 1`, `RESERVED = 2`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    /// Open to any vehicle.
    General,
    /// Reserved for shift workers.
    Shift,
    /// Reserved for named permit holders.
    Reserved,
}

impl ZoneType {
    /// The stable numeric identifier for this zone type.
    ///
    /// # Examples
    ///
    /// ```
    /// use carpark_analyzer_core::capacity::ZoneType;
    ///
    /// assert_eq!(ZoneType::General.type_id(), 0);
    /// assert_eq!(ZoneType::Shift.type_id(), 1);
    /// assert_eq!(ZoneType::Reserved.type_id(), 2);
    /// ```
    #[must_use]
    pub const fn type_id(self) -> u8 {
        match self {
            Self::General => 0,
            Self::Shift => 1,
            Self::Reserved => 2,
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "GENERAL"),
            Self::Shift => write!(f, "SHIFT"),
            Self::Reserved => write!(f, "RESERVED"),
        }
    }
}

/// Capacity entry for a single zone.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCapacity {
    /// Total number of spaces in the zone. Always positive.
    pub total: u32,
    /// The kind of parking the zone offers.
    pub zone_type: ZoneType,
}

impl ZoneCapacity {
    /// Create a capacity entry.
    ///
    /// # Panics
    ///
    /// Panics if `total` is zero; a zone with no spaces cannot appear in the
    /// configuration.
    #[must_use]
    pub const fn new(total: u32, zone_type: ZoneType) -> Self {
        assert!(total > 0, "zone capacity must be positive");
        Self { total, zone_type }
    }
}

/// Immutable snapshot of zone capacities.
///
/// Built once from configuration (any serde source works: JSON, TOML, env
/// glue) and shared read-only across all workers. The engine never mutates
/// a table; replacing configuration means building a new snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapacityTable {
    entries: HashMap<ZoneId, ZoneCapacity>,
}

impl CapacityTable {
    /// Create an empty table.
    ///
    /// Mostly useful in tests; a production table comes from configuration
    /// via serde or [`FromIterator`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the capacity entry for a zone.
    ///
    /// Repeated calls with unchanged configuration always return the same
    /// entry; the snapshot never changes underneath a caller.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownZoneError`] if the zone has no entry.
    pub fn capacity_of(&self, zone: &ZoneId) -> Result<ZoneCapacity, UnknownZoneError> {
        self.entries
            .get(zone)
            .copied()
            .ok_or_else(|| UnknownZoneError { zone: zone.clone() })
    }

    /// Number of zones in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the configured zones.
    pub fn zones(&self) -> impl Iterator<Item = &ZoneId> {
        self.entries.keys()
    }
}

impl FromIterator<(ZoneId, ZoneCapacity)> for CapacityTable {
    fn from_iter<I: IntoIterator<Item = (ZoneId, ZoneCapacity)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
