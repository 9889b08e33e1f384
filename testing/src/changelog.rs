//! In-memory change log for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use carpark_analyzer_core::store::{Changelog, ChangelogRecord, Result, StoreError};
use carpark_analyzer_core::zone::{PartitionId, ZoneId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

/// In-memory, per-partition append-only log.
///
/// Behaves like a durable change log from the store's point of view: it
/// outlives any store instance built over it, so tests can tear a
/// partition store down and rehydrate a fresh one from the same log, the
/// way rebalancing does in production.
///
/// Partitions can be poisoned to simulate an unreadable log and exercise
/// the recovery failure path.
///
/// # Example
///
/// ```
/// use carpark_analyzer_core::store::Changelog;
/// use carpark_analyzer_core::zone::{PartitionId, ZoneId};
/// use carpark_analyzer_testing::InMemoryChangelog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let changelog = InMemoryChangelog::new();
///
/// let offset = changelog
///     .append(PartitionId::new(0), &ZoneId::new("zone-a"), 3)
///     .await?;
/// assert_eq!(offset, 0);
///
/// let records = changelog.replay(PartitionId::new(0)).await?;
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].count, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryChangelog {
    partitions: RwLock<HashMap<PartitionId, Vec<ChangelogRecord>>>,
    poisoned: RwLock<HashSet<PartitionId>>,
}

impl InMemoryChangelog {
    /// Create a new empty change log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make replay of a partition fail until [`heal`](Self::heal)ed.
    ///
    /// Simulates an unreadable backing log, which must keep the partition
    /// out of service.
    pub fn poison(&self, partition: PartitionId) {
        self.poisoned.write().unwrap().insert(partition);
    }

    /// Undo [`poison`](Self::poison) for a partition.
    pub fn heal(&self, partition: PartitionId) {
        self.poisoned.write().unwrap().remove(&partition);
    }

    /// All records appended to a partition, in offset order.
    ///
    /// Useful for asserting that writes reached the log.
    #[must_use]
    pub fn records(&self, partition: PartitionId) -> Vec<ChangelogRecord> {
        self.partitions
            .read()
            .unwrap()
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of records across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.read().unwrap().values().map(Vec::len).sum()
    }

    /// Whether no record has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all records and poison marks (for test isolation).
    pub fn clear(&self) {
        self.partitions.write().unwrap().clear();
        self.poisoned.write().unwrap().clear();
    }
}

impl Changelog for InMemoryChangelog {
    fn append(
        &self,
        partition: PartitionId,
        zone: &ZoneId,
        count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let zone = zone.clone();
        Box::pin(async move {
            let mut partitions = self.partitions.write().unwrap();
            let records = partitions.entry(partition).or_default();
            let offset = records.len() as u64;
            records.push(ChangelogRecord {
                zone,
                count,
                offset,
            });
            Ok(offset)
        })
    }

    fn replay(
        &self,
        partition: PartitionId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChangelogRecord>>> + Send + '_>> {
        Box::pin(async move {
            if self.poisoned.read().unwrap().contains(&partition) {
                return Err(StoreError::Changelog(format!(
                    "partition {partition} log is unreadable"
                )));
            }
            Ok(self.records(partition))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_sequential_offsets() {
        let changelog = InMemoryChangelog::new();
        let p = PartitionId::new(0);

        let first = changelog.append(p, &ZoneId::new("zone-a"), 1).await.unwrap();
        let second = changelog.append(p, &ZoneId::new("zone-a"), 2).await.unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let changelog = InMemoryChangelog::new();

        changelog
            .append(PartitionId::new(0), &ZoneId::new("zone-a"), 1)
            .await
            .unwrap();
        changelog
            .append(PartitionId::new(1), &ZoneId::new("zone-b"), 7)
            .await
            .unwrap();

        assert_eq!(changelog.records(PartitionId::new(0)).len(), 1);
        assert_eq!(changelog.records(PartitionId::new(1)).len(), 1);
        assert_eq!(changelog.replay(PartitionId::new(2)).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn poison_and_heal() {
        let changelog = InMemoryChangelog::new();
        let p = PartitionId::new(0);

        changelog.poison(p);
        assert!(changelog.replay(p).await.is_err());

        changelog.heal(p);
        assert!(changelog.replay(p).await.is_ok());
    }
}
