//! Zone and partition identification types.
//!
//! This module defines strong types for the two keys the engine is organised
//! around: `ZoneId` (the partitioning key of the event stream and the
//! occupancy store) and `PartitionId` (one shard of the zone key space).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `ZoneId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid zone ID: {0}")]
pub struct ParseZoneIdError(String);

/// Unique identifier for a car park zone.
///
/// A zone is the unit of capacity accounting: every barrier event references
/// exactly one zone, every occupancy counter belongs to exactly one zone, and
/// the event stream is partitioned by zone so that per-zone order is
/// preserved end to end.
///
/// # Design
///
/// `ZoneId` is a newtype wrapper around `String` that provides:
/// - Type safety (can't accidentally use a regular string)
/// - Clear intent in function signatures
/// - Serialization support for the wire format and the change log
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for internal use with trusted input)
///
/// Use `FromStr` when parsing external input. Use `new()` or `From` when
/// constructing zone IDs from application-controlled data.
///
/// # Examples
///
/// ```
/// use carpark_analyzer_core::zone::ZoneId;
///
/// let zone = ZoneId::new("zone-a");
/// assert_eq!(zone.as_str(), "zone-a");
///
/// let parsed: ZoneId = "zone-b".parse().unwrap();
/// assert_eq!(parsed, ZoneId::new("zone-b"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(String);

impl ZoneId {
    /// Create a new `ZoneId` from a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use carpark_analyzer_core::zone::ZoneId;
    ///
    /// let zone = ZoneId::new("zone-a");
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the zone ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `ZoneId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ZoneId {
    type Err = ParseZoneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseZoneIdError("Zone ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ZoneId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ZoneId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier for one shard of the zone key space.
///
/// The event stream and the change log are split into a fixed number of
/// partitions; each zone hashes to exactly one partition, and each partition
/// is owned by exactly one worker at any instant. Partition ownership is the
/// mechanism that gives the store its single-writer-per-key discipline.
///
/// # Examples
///
/// ```
/// use carpark_analyzer_core::zone::PartitionId;
///
/// let p = PartitionId::new(3);
/// assert_eq!(p.value(), 3);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Create a new `PartitionId` with the given value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the partition number.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<PartitionId> for u32 {
    fn from(partition: PartitionId) -> Self {
        partition.0
    }
}
