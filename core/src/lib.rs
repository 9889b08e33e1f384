//! # Car Park Analyzer Core
//!
//! Domain types and capability traits for the car park availability engine.
//!
//! This crate defines WHAT flows through the system and the contracts the
//! engine depends on; it contains no I/O implementations. The engine crate
//! composes these contracts into a running pipeline, the transport crate
//! implements them on a Kafka-compatible broker, and the testing crate
//! implements them in memory.
//!
//! ## Core concepts
//!
//! - [`event::BarrierEvent`]: one ENTRY or EXIT crossing for a zone
//! - [`capacity::CapacityTable`]: immutable snapshot of zone capacities
//! - [`status::CarParkStatus`]: derived availability record (count or FULL)
//! - [`store::OccupancyStore`]: keyed, durable occupancy state for one partition
//! - [`store::Changelog`]: append-only log the store recovers from
//! - [`transport::BarrierEventSource`] / [`transport::StatusSink`]: the
//!   engine's view of the external streaming substrate
//!
//! ## Data flow
//!
//! ```text
//! BarrierEvent ──► stateful reduction ──► CarParkStatus
//!                   │          ▲
//!                   ▼          │ replay on recovery
//!                 OccupancyStore ──► Changelog
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod capacity;
pub mod event;
pub mod status;
pub mod store;
pub mod transport;
pub mod zone;

pub use capacity::{CapacityTable, UnknownZoneError, ZoneCapacity, ZoneType};
pub use event::{BarrierEvent, Direction, EventError};
pub use status::{CarParkStatus, Status};
pub use store::{Changelog, ChangelogRecord, OccupancyStore, StoreError};
pub use transport::{BarrierEventSource, BarrierStream, SourceRecord, StatusSink, TransportError};
pub use zone::{ParseZoneIdError, PartitionId, ZoneId};
