//! In-memory barrier event source and status sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use carpark_analyzer_core::event::BarrierEvent;
use carpark_analyzer_core::status::CarParkStatus;
use carpark_analyzer_core::transport::{
    BarrierEventSource, BarrierStream, SourceRecord, StatusSink, TransportError,
};
use carpark_analyzer_core::zone::{PartitionId, ZoneId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type QueuedItem = Result<SourceRecord, TransportError>;

#[derive(Default)]
struct PartitionQueue {
    items: VecDeque<QueuedItem>,
    next_offset: u64,
}

#[derive(Default)]
struct BusInner {
    partitions: Mutex<HashMap<PartitionId, PartitionQueue>>,
    published: Mutex<Vec<(ZoneId, CarParkStatus)>>,
    notify: Notify,
}

/// In-memory event source and status sink in one.
///
/// Tests push events onto explicit partitions (the external broker decides
/// zone-to-partition placement in production, so tests just choose) and
/// read back the statuses the engine published. Events pushed before a
/// subscriber exists are delivered once one arrives; per-partition order is
/// preserved.
///
/// Cheap to clone; clones share the same queues.
///
/// # Example
///
/// ```
/// use carpark_analyzer_core::event::{BarrierEvent, Direction};
/// use carpark_analyzer_core::transport::BarrierEventSource;
/// use carpark_analyzer_core::zone::{PartitionId, ZoneId};
/// use carpark_analyzer_testing::InMemoryBarrierBus;
/// use chrono::Utc;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBarrierBus::new();
/// let partition = PartitionId::new(0);
///
/// bus.push(
///     partition,
///     BarrierEvent::new(ZoneId::new("zone-a"), Direction::Entry, Utc::now()),
/// );
///
/// let mut stream = bus.subscribe(&[partition]).await?;
/// let record = stream.next().await.unwrap()?;
/// assert_eq!(record.offset, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBarrierBus {
    inner: Arc<BusInner>,
}

impl InMemoryBarrierBus {
    /// Create a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to a partition's queue.
    ///
    /// Returns the offset the bus assigned to the event.
    pub fn push(&self, partition: PartitionId, event: BarrierEvent) -> u64 {
        let mut partitions = self.inner.partitions.lock().unwrap();
        let queue = partitions.entry(partition).or_default();
        let offset = queue.next_offset;
        queue.next_offset += 1;
        queue.items.push_back(Ok(SourceRecord {
            partition,
            offset,
            event,
        }));
        drop(partitions);

        self.inner.notify.notify_waiters();
        offset
    }

    /// Append a transport failure to a partition's queue.
    ///
    /// The subscriber observes it as an `Err` stream item, the way a real
    /// broker surfaces a delivery failure.
    pub fn push_error(&self, partition: PartitionId, error: TransportError) {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .entry(partition)
            .or_default()
            .items
            .push_back(Err(error));
        self.inner.notify.notify_waiters();
    }

    /// All statuses published so far, in publish order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(ZoneId, CarParkStatus)> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Statuses published for one zone, in publish order.
    #[must_use]
    pub fn statuses_for(&self, zone: &ZoneId) -> Vec<CarParkStatus> {
        self.inner
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(z, _)| z == zone)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Drop all published statuses (for test isolation).
    pub fn clear_statuses(&self) {
        self.inner.published.lock().unwrap().clear();
    }

    fn pop_next(&self, partitions: &[PartitionId]) -> Option<QueuedItem> {
        let mut queues = self.inner.partitions.lock().unwrap();
        for partition in partitions {
            if let Some(queue) = queues.get_mut(partition) {
                if let Some(item) = queue.items.pop_front() {
                    return Some(item);
                }
            }
        }
        None
    }
}

impl BarrierEventSource for InMemoryBarrierBus {
    fn subscribe(
        &self,
        partitions: &[PartitionId],
    ) -> Pin<Box<dyn Future<Output = Result<BarrierStream, TransportError>> + Send + '_>> {
        let bus = self.clone();
        let partitions = partitions.to_vec();

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    // Register for wakeups before checking the queues so a
                    // push between check and await is not lost.
                    let notified = bus.inner.notify.notified();
                    tokio::pin!(notified);

                    if let Some(item) = bus.pop_next(&partitions) {
                        yield item;
                    } else {
                        notified.await;
                    }
                }

                // The loop above never terminates; this unreachable unit
                // gives the generated async block an `Output = ()` type so it
                // satisfies the `Stream` bound.
                #[allow(unreachable_code)]
                {
                    ()
                }
            };

            Ok(Box::pin(stream) as BarrierStream)
        })
    }
}

impl StatusSink for InMemoryBarrierBus {
    fn publish(
        &self,
        zone: &ZoneId,
        status: &CarParkStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let zone = zone.clone();
        let status = *status;
        Box::pin(async move {
            self.inner.published.lock().unwrap().push((zone, status));
            Ok(())
        })
    }
}
