//! # Car Park Analyzer Testing
//!
//! In-memory implementations of every capability contract, plus fixtures,
//! for fast and deterministic tests:
//!
//! - [`InMemoryChangelog`]: per-partition append-only log with poison
//!   support for exercising recovery failures
//! - [`InMemoryBarrierBus`]: event source and status sink in one, with
//!   explicit partition queues
//! - [`fixtures`]: capacity table and event builders
//!
//! ## Example
//!
//! ```ignore
//! use carpark_analyzer_testing::{fixtures, InMemoryBarrierBus, InMemoryChangelog};
//!
//! let bus = InMemoryBarrierBus::new();
//! let changelog = Arc::new(InMemoryChangelog::new());
//! let capacity = fixtures::capacity_table(&[("zone-a", 2, ZoneType::General)]);
//! // wire into the engine and drive events through `bus.push(...)`
//! ```

pub mod bus;
pub mod changelog;

/// Fixtures for building test data tersely.
pub mod fixtures {
    use carpark_analyzer_core::capacity::{CapacityTable, ZoneCapacity, ZoneType};
    use carpark_analyzer_core::event::{BarrierEvent, Direction};
    use carpark_analyzer_core::zone::ZoneId;
    use chrono::Utc;

    /// Build a capacity table from `(zone, total, type)` triples.
    ///
    /// # Example
    ///
    /// ```
    /// use carpark_analyzer_core::capacity::ZoneType;
    /// use carpark_analyzer_testing::fixtures::capacity_table;
    ///
    /// let table = capacity_table(&[("zone-a", 2, ZoneType::General)]);
    /// assert_eq!(table.len(), 1);
    /// ```
    #[must_use]
    pub fn capacity_table(entries: &[(&str, u32, ZoneType)]) -> CapacityTable {
        entries
            .iter()
            .map(|(zone, total, zone_type)| {
                (ZoneId::new(*zone), ZoneCapacity::new(*total, *zone_type))
            })
            .collect()
    }

    /// An ENTRY event for a zone, stamped now.
    #[must_use]
    pub fn entry(zone: &str) -> BarrierEvent {
        BarrierEvent::new(ZoneId::new(zone), Direction::Entry, Utc::now())
    }

    /// An EXIT event for a zone, stamped now.
    #[must_use]
    pub fn exit(zone: &str) -> BarrierEvent {
        BarrierEvent::new(ZoneId::new(zone), Direction::Exit, Utc::now())
    }
}

// Re-export commonly used items
pub use bus::InMemoryBarrierBus;
pub use changelog::InMemoryChangelog;
