//! Occupancy store and change log contracts.
//!
//! # Overview
//!
//! The occupancy store is the only mutable state in the system: a keyed,
//! durable mapping from zone to current occupancy count. It is partitioned
//! by zone, and each partition is owned by exactly one worker at a time, so
//! the store needs no fine-grained locking; single-writer-per-key discipline
//! comes from partition ownership.
//!
//! Durability comes from the change log: an append-only, per-partition log
//! of committed counts that outlives any single worker. After a crash or an
//! ownership transfer, the new owner replays the log to reconstruct the last
//! committed count for every key before serving a single event. That replay
//! is the store's central correctness guarantee: no event is ever processed
//! against stale or lost state.
//!
//! ```text
//! ┌──────────────┐  put(zone, count)   ┌──────────────────┐
//! │ Transformer  │────────────────────►│ Occupancy Store  │
//! └──────────────┘                     │ (one partition)  │
//!                                      └────────┬─────────┘
//!                                               │ append
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │   Change Log     │◄─ replayed on
//!                                      │ (durable, per-   │   recovery /
//!                                      │  partition)      │   rebalancing
//!                                      └──────────────────┘
//! ```
//!
//! # Dyn Compatibility
//!
//! Both traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` to enable trait object usage (`Arc<dyn Changelog>`,
//! `&dyn OccupancyStore`). The engine wires implementations in as
//! capabilities, so trait objects are required.

use crate::zone::{PartitionId, ZoneId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store and change log operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Local storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Appending to or reading from the change log failed.
    #[error("Change log error: {0}")]
    Changelog(String),

    /// Change log replay failed while taking ownership of a partition.
    ///
    /// Fatal to the affected partition: serving it without a completed
    /// replay would silently corrupt downstream status.
    #[error("Recovery failed for partition {partition}: {reason}")]
    Recovery {
        /// The partition whose replay failed.
        partition: PartitionId,
        /// Why the replay failed.
        reason: String,
    },

    /// A record could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed occupancy state for the zones of one partition.
///
/// The two operations are deliberately minimal: the reduction step needs
/// nothing beyond point reads and atomic per-key overwrites. Scans and
/// deletes are not part of the contract.
///
/// # Contract
///
/// - `get` returns 0 for a zone that has never been written; a zone's
///   counter springs into existence at its first event.
/// - `put` atomically overwrites one key and must be durable (recorded in
///   the change log) before it is observable.
/// - Implementations are partition-scoped: callers only ever hand a store
///   keys that hash to the partition it owns.
pub trait OccupancyStore: Send + Sync {
    /// Read the current occupancy count for a zone.
    ///
    /// Returns 0 if the zone has never been seen.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the read fails, including when the
    /// store has not completed recovery for its partition.
    fn get(&self, zone: &ZoneId) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    /// Overwrite the occupancy count for a zone.
    ///
    /// The write must reach the change log before it is considered
    /// committed; a crash after `put` returns must never lose the count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Changelog`] if the durable append fails, or
    /// [`StoreError::Storage`] if the store cannot accept the write.
    fn put(
        &self,
        zone: &ZoneId,
        count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// One committed store mutation in the change log.
///
/// Records carry the logical offset assigned by the log; replay applies
/// records in offset order, and the last record per zone wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangelogRecord {
    /// The zone whose count changed.
    pub zone: ZoneId,
    /// The committed occupancy count.
    pub count: u32,
    /// Logical offset of this record within its partition.
    pub offset: u64,
}

/// Durable, append-only, per-partition log of store mutations.
///
/// The change log is not a public API of the system; it exists solely so a
/// partition's state can be reconstructed on another worker. Its backing
/// medium (a compacted topic, a file, an in-memory vector in tests) must
/// outlive any single worker instance.
///
/// # Replay shape
///
/// `replay` materializes the whole partition into a `Vec`. Backings are
/// expected to compact by key, which bounds the result to roughly one
/// record per live zone; a streaming replay is not needed at that size.
pub trait Changelog: Send + Sync {
    /// Append a committed count for a zone to a partition's log.
    ///
    /// Returns the logical offset the log assigned to the record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Changelog`] if the append fails. Callers treat
    /// a failed append as a failed write: the in-memory state must not move
    /// ahead of the log.
    fn append(
        &self,
        partition: PartitionId,
        zone: &ZoneId,
        count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Replay every record of a partition, in offset order.
    ///
    /// Returns an empty `Vec` for a partition that has never been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Changelog`] if the log cannot be read. The
    /// caller must not serve the partition after a failed replay.
    fn replay(
        &self,
        partition: PartitionId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChangelogRecord>>> + Send + '_>>;
}
