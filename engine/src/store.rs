//! Change-log backed occupancy store for one partition.
//!
//! [`ZonePartitionStore`] is the engine's implementation of the
//! [`OccupancyStore`] contract: an in-memory map of zone counts whose every
//! write goes through the durable change log before it becomes observable.
//! One instance owns exactly one partition; the engine tears the instance
//! down when ownership moves and builds a fresh one on the receiving
//! worker, which rehydrates from the log.
//!
//! # Write path
//!
//! `put` appends to the change log first and only then updates the map.
//! A crash between the two steps re-applies the append on replay, so the
//! committed count is never lost; it may be re-emitted downstream, which
//! at-least-once delivery already requires consumers to tolerate.
//!
//! # Recovery gate
//!
//! The store refuses reads and writes until [`ZonePartitionStore::recover`]
//! has completed. This makes the "no event is processed against stale or
//! lost state" guarantee structural: a worker that skips recovery gets
//! errors, not silently empty state.

use carpark_analyzer_core::store::{Changelog, OccupancyStore, Result, StoreError};
use carpark_analyzer_core::zone::{PartitionId, ZoneId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Occupancy state for the zones of one partition, durable via a change log.
pub struct ZonePartitionStore {
    name: String,
    partition: PartitionId,
    changelog: Arc<dyn Changelog>,
    counts: RwLock<HashMap<ZoneId, u32>>,
    ready: AtomicBool,
    last_offset: AtomicU64,
}

impl ZonePartitionStore {
    /// Sentinel for "no change log record applied yet".
    const NO_OFFSET: u64 = u64::MAX;

    /// Create a store for one partition, not yet recovered.
    ///
    /// The store must be [`recover`](Self::recover)ed before it serves any
    /// read or write.
    #[must_use]
    pub fn new(name: impl Into<String>, partition: PartitionId, changelog: Arc<dyn Changelog>) -> Self {
        Self {
            name: name.into(),
            partition,
            changelog,
            counts: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            last_offset: AtomicU64::new(Self::NO_OFFSET),
        }
    }

    /// Rebuild the partition's state from the change log.
    ///
    /// Replays every record in offset order; the last record per zone
    /// wins. On success the store starts serving. Returns the number of
    /// records applied.
    ///
    /// Safe to call again after a failure; the map is rebuilt from
    /// scratch on every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Recovery`] if the change log cannot be
    /// replayed. The store keeps refusing reads and writes, so the
    /// partition cannot be served with stale or empty state.
    pub async fn recover(&self) -> Result<usize> {
        let records = self
            .changelog
            .replay(self.partition)
            .await
            .map_err(|e| StoreError::Recovery {
                partition: self.partition,
                reason: e.to_string(),
            })?;

        let mut counts = self.counts.write().await;
        counts.clear();
        let mut last_offset = Self::NO_OFFSET;
        for record in &records {
            counts.insert(record.zone.clone(), record.count);
            last_offset = record.offset;
        }
        drop(counts);

        self.last_offset.store(last_offset, Ordering::Release);
        self.ready.store(true, Ordering::Release);

        tracing::info!(
            store = %self.name,
            partition = %self.partition,
            records = records.len(),
            "Store recovered from change log"
        );

        Ok(records.len())
    }

    /// Whether recovery has completed and the store is serving.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The partition this store owns.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The store's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the last change log record this store applied, if any.
    #[must_use]
    pub fn last_offset(&self) -> Option<u64> {
        match self.last_offset.load(Ordering::Acquire) {
            Self::NO_OFFSET => None,
            offset => Some(offset),
        }
    }

    /// Number of zones with a materialized count.
    pub async fn len(&self) -> usize {
        self.counts.read().await.len()
    }

    /// Whether no zone has been materialized yet.
    pub async fn is_empty(&self) -> bool {
        self.counts.read().await.is_empty()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StoreError::Storage(format!(
                "store '{}' partition {} has not completed recovery",
                self.name, self.partition
            )))
        }
    }
}

impl OccupancyStore for ZonePartitionStore {
    fn get(&self, zone: &ZoneId) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        let zone = zone.clone();
        Box::pin(async move {
            self.ensure_ready()?;
            Ok(self.counts.read().await.get(&zone).copied().unwrap_or(0))
        })
    }

    fn put(&self, zone: &ZoneId, count: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let zone = zone.clone();
        Box::pin(async move {
            self.ensure_ready()?;

            // Log first, map second: the map must never be ahead of the log.
            let offset = self.changelog.append(self.partition, &zone, count).await?;
            self.counts.write().await.insert(zone, count);
            self.last_offset.store(offset, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carpark_analyzer_testing::InMemoryChangelog;

    fn store(changelog: &Arc<InMemoryChangelog>) -> ZonePartitionStore {
        let log: Arc<dyn Changelog> = Arc::clone(changelog) as Arc<dyn Changelog>;
        ZonePartitionStore::new("carpark-zone-store", PartitionId::new(0), log)
    }

    #[tokio::test]
    async fn refuses_access_before_recovery() {
        let changelog = Arc::new(InMemoryChangelog::new());
        let s = store(&changelog);

        assert!(!s.is_ready());
        assert!(s.get(&ZoneId::new("zone-a")).await.is_err());
        assert!(s.put(&ZoneId::new("zone-a"), 1).await.is_err());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if store ops fail
    async fn unseen_zone_defaults_to_zero() {
        let changelog = Arc::new(InMemoryChangelog::new());
        let s = store(&changelog);
        s.recover().await.expect("empty log recovers");

        let count = s.get(&ZoneId::new("zone-a")).await.expect("store is ready");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if store ops fail
    async fn put_reaches_changelog_before_map() {
        let changelog = Arc::new(InMemoryChangelog::new());
        let s = store(&changelog);
        s.recover().await.expect("empty log recovers");

        s.put(&ZoneId::new("zone-a"), 3).await.expect("write succeeds");

        let records = changelog.records(PartitionId::new(0));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].zone, ZoneId::new("zone-a"));
        assert_eq!(records[0].count, 3);
        assert_eq!(s.last_offset(), Some(records[0].offset));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if store ops fail
    async fn rehydrates_last_committed_counts() {
        let changelog = Arc::new(InMemoryChangelog::new());

        let first = store(&changelog);
        first.recover().await.expect("empty log recovers");
        first.put(&ZoneId::new("zone-a"), 1).await.expect("write");
        first.put(&ZoneId::new("zone-a"), 2).await.expect("write");
        first.put(&ZoneId::new("zone-b"), 5).await.expect("write");
        drop(first);

        let second = store(&changelog);
        let applied = second.recover().await.expect("log replays");
        assert_eq!(applied, 3);
        assert_eq!(
            second.get(&ZoneId::new("zone-a")).await.expect("ready"),
            2,
            "last write per zone wins"
        );
        assert_eq!(second.get(&ZoneId::new("zone-b")).await.expect("ready"), 5);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if store ops fail
    async fn replaying_twice_converges() {
        let changelog = Arc::new(InMemoryChangelog::new());

        let writer = store(&changelog);
        writer.recover().await.expect("empty log recovers");
        writer.put(&ZoneId::new("zone-a"), 4).await.expect("write");

        let reader = store(&changelog);
        reader.recover().await.expect("first replay");
        reader.recover().await.expect("second replay");

        assert_eq!(reader.get(&ZoneId::new("zone-a")).await.expect("ready"), 4);
        assert_eq!(reader.len().await, 1);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if recovery unexpectedly succeeds
    async fn poisoned_changelog_fails_recovery() {
        let changelog = Arc::new(InMemoryChangelog::new());
        changelog.poison(PartitionId::new(0));

        let s = store(&changelog);
        let err = s.recover().await.unwrap_err();

        assert!(matches!(err, StoreError::Recovery { partition, .. } if partition == PartitionId::new(0)));
        assert!(!s.is_ready());
    }
}
