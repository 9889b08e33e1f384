//! Per-partition worker loop.
//!
//! One worker owns one partition: it is the only task that reads or writes
//! that partition's store, and it applies the partition's events strictly
//! in delivery order. Workers for different partitions run fully in
//! parallel and share nothing mutable.
//!
//! Per-event errors (unknown zone) are reported and skipped; transport and
//! store failures are faults that stop the worker and surface to the
//! engine's fault handling.

use crate::engine::EngineError;
use crate::store::ZonePartitionStore;
use crate::transformer::{Anomaly, BarrierEventTransformer, TransformError};
use carpark_analyzer_core::transport::{BarrierStream, SourceRecord, StatusSink};
use carpark_analyzer_core::zone::PartitionId;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) struct PartitionWorker {
    partition: PartitionId,
    store: Arc<ZonePartitionStore>,
    transformer: Arc<BarrierEventTransformer>,
    sink: Arc<dyn StatusSink>,
    anomalies: mpsc::Sender<Anomaly>,
    faults: mpsc::Sender<EngineError>,
    shutdown: watch::Receiver<bool>,
}

impl PartitionWorker {
    pub(crate) const fn new(
        partition: PartitionId,
        store: Arc<ZonePartitionStore>,
        transformer: Arc<BarrierEventTransformer>,
        sink: Arc<dyn StatusSink>,
        anomalies: mpsc::Sender<Anomaly>,
        faults: mpsc::Sender<EngineError>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            partition,
            store,
            transformer,
            sink,
            anomalies,
            faults,
            shutdown,
        }
    }

    /// Process the partition's event stream until shutdown, stream end, or
    /// a fault.
    ///
    /// The current event is always finished before the loop exits, so a
    /// graceful drain never abandons a half-applied store write.
    pub(crate) async fn run(mut self, mut events: BarrierStream) {
        tracing::info!(partition = %self.partition, "Partition worker started");

        loop {
            tokio::select! {
                maybe_record = events.next() => {
                    match maybe_record {
                        Some(Ok(record)) => {
                            if let Err(err) = self.handle(record).await {
                                self.report_fault(err).await;
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            self.report_fault(EngineError::Transport(e)).await;
                            break;
                        }
                        None => {
                            tracing::debug!(partition = %self.partition, "Event stream ended");
                            break;
                        }
                    }
                }
                changed = self.shutdown.changed() => {
                    // A closed channel means the engine is gone; treat it
                    // like a stop signal instead of spinning.
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!(partition = %self.partition, "Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(partition = %self.partition, "Partition worker stopped");
    }

    async fn handle(&self, record: SourceRecord) -> Result<(), EngineError> {
        match self
            .transformer
            .transform(self.store.as_ref(), &record.event)
            .await
        {
            Ok(outcome) => {
                self.sink
                    .publish(&outcome.zone, &outcome.status)
                    .await
                    .map_err(EngineError::Transport)?;

                metrics::counter!("carpark.events.processed").increment(1);
                tracing::debug!(
                    partition = %self.partition,
                    offset = record.offset,
                    zone = %outcome.zone,
                    status = %outcome.status,
                    "Status emitted"
                );

                if let Some(anomaly) = outcome.anomaly {
                    self.report_anomaly(anomaly).await;
                }
                Ok(())
            }
            Err(TransformError::UnknownZone(e)) => {
                tracing::warn!(
                    partition = %self.partition,
                    offset = record.offset,
                    zone = %e.zone,
                    "Dropping event for unknown zone"
                );
                self.report_anomaly(Anomaly::UnknownZone {
                    zone: e.zone,
                    direction: record.event.direction,
                })
                .await;
                Ok(())
            }
            Err(TransformError::Store(e)) => Err(EngineError::Store(e)),
        }
    }

    async fn report_anomaly(&self, anomaly: Anomaly) {
        match &anomaly {
            Anomaly::UnknownZone { .. } => {
                metrics::counter!("carpark.anomalies.unknown_zone").increment(1);
            }
            Anomaly::Overflow { .. } => {
                metrics::counter!("carpark.anomalies.overflow").increment(1);
            }
        }

        if self.anomalies.send(anomaly).await.is_err() {
            tracing::debug!(partition = %self.partition, "Anomaly channel closed, report dropped");
        }
    }

    async fn report_fault(&self, err: EngineError) {
        tracing::error!(partition = %self.partition, error = %err, "Partition worker fault");
        metrics::counter!("carpark.worker.faults").increment(1);

        if self.faults.send(err).await.is_err() {
            tracing::debug!(partition = %self.partition, "Fault channel closed");
        }
    }
}
