//! Engine lifecycle: partition ownership, recovery, graceful shutdown.
//!
//! # Overview
//!
//! [`CarParkEngine`] composes the pieces a [`Topology`] declares into a
//! running pipeline and owns their lifecycle:
//!
//! ```text
//! ┌──────────────┐      ┌───────────────────────────────┐      ┌────────────┐
//! │ Event Source │─────►│  PartitionWorker (per shard)  │─────►│ Status Sink│
//! └──────────────┘      │  ┌─────────────┐ ┌──────────┐ │      └────────────┘
//!                       │  │ Transformer │ │  Store   │ │
//!                       │  └─────────────┘ └────┬─────┘ │
//!                       └───────────────────────┼───────┘
//!                                               ▼
//!                                         ┌──────────┐
//!                                         │Change Log│◄── replayed before a
//!                                         └──────────┘    partition serves
//! ```
//!
//! # Ownership transfer
//!
//! Partition ownership is explicit state, not implicit shared access:
//! [`CarParkEngine::assign`] recovers the shard's store from the change log
//! (bounded retries) before the worker sees a single event, and
//! [`CarParkEngine::revoke`] drains the worker and releases the shard so
//! another engine instance can pick it up. The recovery pause is the
//! principal latency spike in the system, so it is logged and measured.
//!
//! # Fault policy
//!
//! Per-event errors never reach this module; workers absorb them. What
//! arrives on the fault channel is unrecoverable (transport failure, store
//! failure, exhausted recovery retries): the first such fault triggers the
//! fatal callback once and then drains the engine cleanly, mirroring an
//! uncaught-exception handler that closes the pipeline rather than let it
//! limp along with partial state.

use crate::store::ZonePartitionStore;
use crate::topology::Topology;
use crate::transformer::{Anomaly, BarrierEventTransformer, OvershootPolicy};
use crate::worker::PartitionWorker;
use carpark_analyzer_core::capacity::CapacityTable;
use carpark_analyzer_core::store::{Changelog, StoreError};
use carpark_analyzer_core::transport::{BarrierEventSource, StatusSink, TransportError};
use carpark_analyzer_core::zone::PartitionId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Delay between change log replay attempts while taking ownership.
const RECOVERY_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Errors that can stop the engine or one of its partitions.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The engine was built with missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Change log replay failed repeatedly while taking ownership of a
    /// partition. The partition is not served.
    #[error("Recovery failed for partition {partition}: {reason}")]
    StoreRecovery {
        /// The partition that could not be recovered.
        partition: PartitionId,
        /// Why the final replay attempt failed.
        reason: String,
    },

    /// A store operation failed while processing events.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    /// The external transport failed to deliver or accept records.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The partition is already owned by this engine.
    #[error("Partition {0} is already assigned")]
    AlreadyAssigned(PartitionId),

    /// The partition is not owned by this engine.
    #[error("Partition {0} is not assigned")]
    NotAssigned(PartitionId),

    /// `start` was called more than once.
    #[error("Engine already started")]
    AlreadyStarted,

    /// Workers did not drain within the shutdown timeout.
    #[error("Shutdown timed out with {pending} worker(s) still running")]
    ShutdownTimeout {
        /// How many workers were still running when the timeout expired.
        pending: usize,
    },
}

/// Observable lifecycle state of the engine.
///
/// Published on a `watch` channel so operators can see rebalancing phases
/// without scraping logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Built, no partition assigned yet.
    Created,
    /// At least one partition is recovering state.
    Rebalancing,
    /// All assigned partitions are serving.
    Running,
    /// Graceful shutdown in progress.
    Draining,
    /// All partitions released.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Rebalancing => write!(f, "REBALANCING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Callback invoked once on the first unrecoverable fault.
pub type FatalHandler = Box<dyn Fn(&EngineError) + Send + Sync>;

struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct EngineInner {
    topology: Topology,
    transformer: Arc<BarrierEventTransformer>,
    source: Arc<dyn BarrierEventSource>,
    sink: Arc<dyn StatusSink>,
    changelog: Arc<dyn Changelog>,
    workers: Mutex<HashMap<PartitionId, WorkerHandle>>,
    state_tx: watch::Sender<EngineState>,
    anomaly_tx: mpsc::Sender<Anomaly>,
    fault_tx: mpsc::Sender<EngineError>,
    fault_rx: Mutex<Option<mpsc::Receiver<EngineError>>>,
    on_fatal: Mutex<Option<FatalHandler>>,
    recovery_retries: u32,
    shutdown_timeout: Duration,
}

/// The reduction engine: source, stateful transform, sink, and the
/// lifecycle that keeps the store's single-writer discipline intact.
///
/// Cheap to clone; clones share the same engine.
///
/// # Example
///
/// ```ignore
/// let topology = Topology::builder()
///     .source_topic("carpark-barrier-events")
///     .output_topic("carpark-availability")
///     .store_name("carpark-zone-store")
///     .changelog_topic("carpark-zone-store-changelog")
///     .partitions(4)
///     .build()?;
///
/// let (engine, mut anomalies) = CarParkEngine::builder()
///     .topology(topology)
///     .capacity(capacity_table)
///     .source(source)
///     .sink(sink)
///     .changelog(changelog)
///     .on_fatal(|err| tracing::error!(error = %err, "engine fault"))
///     .build()?;
///
/// engine.start(&engine.partition_ids()).await?;
/// // ... later ...
/// engine.stop().await?;
/// ```
#[derive(Clone)]
pub struct CarParkEngine {
    inner: Arc<EngineInner>,
}

impl CarParkEngine {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> CarParkEngineBuilder {
        CarParkEngineBuilder::default()
    }

    /// The topology this engine runs.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Every partition of the topology, in order. Convenience for the
    /// common single-instance deployment that owns the whole key space.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.inner.topology.partition_ids()
    }

    /// Subscribe to lifecycle state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.state_tx.subscribe()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> EngineState {
        *self.inner.state_tx.borrow()
    }

    /// Partitions currently owned by this engine.
    pub async fn assigned_partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<PartitionId> =
            self.inner.workers.lock().await.keys().copied().collect();
        partitions.sort();
        partitions
    }

    /// Start the engine on an initial partition assignment.
    ///
    /// Recovers and spawns a worker for each partition, then begins fault
    /// supervision: the first unrecoverable fault invokes the fatal
    /// callback once and drains the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyStarted`] on a second call, or the
    /// first assignment error encountered (see [`assign`](Self::assign)).
    pub async fn start(&self, partitions: &[PartitionId]) -> Result<(), EngineError> {
        let fault_rx = self
            .inner
            .fault_rx
            .lock()
            .await
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        tracing::info!(topology = %self.inner.topology, "Starting car park engine");
        self.spawn_supervisor(fault_rx);

        for partition in partitions {
            self.assign(*partition).await?;
        }

        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Take ownership of one partition.
    ///
    /// Recovers the partition's store from the change log (bounded
    /// retries) before the worker accepts a single event. Recovery
    /// exhaustion escalates on the fault channel in addition to the
    /// returned error, since serving the partition with lost state would
    /// silently corrupt downstream status.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyAssigned`] if this engine owns the partition
    /// - [`EngineError::StoreRecovery`] after exhausted replay retries
    /// - [`EngineError::Transport`] if the partition subscription fails
    pub async fn assign(&self, partition: PartitionId) -> Result<(), EngineError> {
        let mut workers = self.inner.workers.lock().await;
        if workers.contains_key(&partition) {
            return Err(EngineError::AlreadyAssigned(partition));
        }

        self.set_state(EngineState::Rebalancing);

        let store = Arc::new(ZonePartitionStore::new(
            self.inner.topology.store_name(),
            partition,
            Arc::clone(&self.inner.changelog),
        ));
        self.recover_with_retries(&store, partition).await?;

        let stream = self
            .inner
            .source
            .subscribe(&[partition])
            .await
            .map_err(EngineError::Transport)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            partition,
            store,
            Arc::clone(&self.inner.transformer),
            Arc::clone(&self.inner.sink),
            self.inner.anomaly_tx.clone(),
            self.inner.fault_tx.clone(),
            stop_rx,
        );
        let join = tokio::spawn(worker.run(stream));
        workers.insert(partition, WorkerHandle { stop_tx, join });

        metrics::gauge!("carpark.partitions.owned").set(workers.len() as f64);
        tracing::info!(partition = %partition, "Partition assigned");

        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Release ownership of one partition.
    ///
    /// Signals the worker to stop, waits for it to finish its in-flight
    /// event, and drops the shard. The change log keeps the state, so
    /// another engine instance can [`assign`](Self::assign) the partition
    /// and resume from the last committed count.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotAssigned`] if this engine does not own the
    ///   partition
    /// - [`EngineError::ShutdownTimeout`] if the worker does not drain in
    ///   time (the worker task is aborted)
    pub async fn revoke(&self, partition: PartitionId) -> Result<(), EngineError> {
        let handle = {
            let mut workers = self.inner.workers.lock().await;
            let handle = workers
                .remove(&partition)
                .ok_or(EngineError::NotAssigned(partition))?;
            metrics::gauge!("carpark.partitions.owned").set(workers.len() as f64);
            handle
        };

        let WorkerHandle { stop_tx, mut join } = handle;
        let _ = stop_tx.send(true);

        match timeout(self.inner.shutdown_timeout, &mut join).await {
            Ok(Ok(())) => {
                tracing::info!(partition = %partition, "Partition released");
                Ok(())
            }
            Ok(Err(join_err)) => {
                tracing::error!(partition = %partition, error = %join_err, "Worker task failed");
                Ok(())
            }
            Err(_) => {
                join.abort();
                tracing::error!(partition = %partition, "Worker did not drain in time, aborted");
                Err(EngineError::ShutdownTimeout { pending: 1 })
            }
        }
    }

    /// Gracefully shut the engine down.
    ///
    /// Stops accepting new events, lets each worker finish its in-flight
    /// store write, and releases every partition so another instance can
    /// resume without data loss.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutdownTimeout`] if any worker failed to
    /// drain within the configured timeout; all other partitions are still
    /// released.
    pub async fn stop(&self) -> Result<(), EngineError> {
        tracing::info!("Closing car park engine");
        self.set_state(EngineState::Draining);

        let partitions: Vec<PartitionId> = self.assigned_partitions().await;
        let mut pending = 0_usize;
        for partition in partitions {
            match self.revoke(partition).await {
                Ok(()) | Err(EngineError::NotAssigned(_)) => {}
                Err(EngineError::ShutdownTimeout { .. }) => pending += 1,
                Err(other) => {
                    tracing::error!(partition = %partition, error = %other, "Error releasing partition");
                }
            }
        }

        self.set_state(EngineState::Stopped);

        if pending > 0 {
            Err(EngineError::ShutdownTimeout { pending })
        } else {
            Ok(())
        }
    }

    async fn recover_with_retries(
        &self,
        store: &Arc<ZonePartitionStore>,
        partition: PartitionId,
    ) -> Result<(), EngineError> {
        let started = tokio::time::Instant::now();

        for attempt in 1..=self.inner.recovery_retries {
            metrics::counter!("carpark.recovery.attempts").increment(1);
            match store.recover().await {
                Ok(records) => {
                    let elapsed = started.elapsed();
                    metrics::histogram!("carpark.recovery.duration_ms")
                        .record(elapsed.as_secs_f64() * 1000.0);
                    tracing::info!(
                        partition = %partition,
                        records,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        "Partition state recovered"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.inner.recovery_retries => {
                    metrics::counter!("carpark.recovery.failures").increment(1);
                    tracing::warn!(
                        partition = %partition,
                        attempt,
                        error = %e,
                        "Change log replay failed, retrying"
                    );
                    tokio::time::sleep(RECOVERY_RETRY_DELAY).await;
                }
                Err(e) => {
                    metrics::counter!("carpark.recovery.failures").increment(1);
                    let err = EngineError::StoreRecovery {
                        partition,
                        reason: e.to_string(),
                    };
                    tracing::error!(
                        partition = %partition,
                        attempt,
                        error = %err,
                        "Change log replay failed, partition not served"
                    );
                    // Escalate: repeated replay failure is a process-level problem.
                    let _ = self.inner.fault_tx.send(err.clone()).await;
                    return Err(err);
                }
            }
        }

        // recovery_retries is validated positive at build time.
        Err(EngineError::StoreRecovery {
            partition,
            reason: "no replay attempts configured".to_string(),
        })
    }

    fn spawn_supervisor(&self, mut fault_rx: mpsc::Receiver<EngineError>) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Some(err) = fault_rx.recv().await {
                tracing::error!(error = %err, "Fatal engine fault, draining");
                metrics::counter!("carpark.engine.fatal").increment(1);

                if let Some(handler) = engine.inner.on_fatal.lock().await.take() {
                    handler(&err);
                }

                if let Err(stop_err) = engine.stop().await {
                    tracing::error!(error = %stop_err, "Drain after fatal fault incomplete");
                }
            }
        });
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Engine state changed");
        }
    }
}

/// Builder for [`CarParkEngine`].
///
/// `build` returns the engine together with the receiving end of the
/// anomaly side channel; drop the receiver if the deployment only wants
/// anomalies as metrics and logs.
#[derive(Default)]
pub struct CarParkEngineBuilder {
    topology: Option<Topology>,
    capacity: Option<CapacityTable>,
    source: Option<Arc<dyn BarrierEventSource>>,
    sink: Option<Arc<dyn StatusSink>>,
    changelog: Option<Arc<dyn Changelog>>,
    policy: OvershootPolicy,
    on_fatal: Option<FatalHandler>,
    recovery_retries: Option<u32>,
    shutdown_timeout: Option<Duration>,
    anomaly_buffer: Option<usize>,
}

impl CarParkEngineBuilder {
    /// Set the pipeline topology.
    #[must_use]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Set the zone capacity snapshot.
    #[must_use]
    pub fn capacity(mut self, capacity: CapacityTable) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the barrier event source.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn BarrierEventSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the status sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the durable change log backend.
    #[must_use]
    pub fn changelog(mut self, changelog: Arc<dyn Changelog>) -> Self {
        self.changelog = Some(changelog);
        self
    }

    /// Set the overshoot policy (default: zero tolerance).
    #[must_use]
    pub const fn overshoot_policy(mut self, policy: OvershootPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the callback invoked once on the first unrecoverable fault.
    #[must_use]
    pub fn on_fatal(mut self, handler: impl Fn(&EngineError) + Send + Sync + 'static) -> Self {
        self.on_fatal = Some(Box::new(handler));
        self
    }

    /// Set how many change log replay attempts to make per assignment
    /// (default: 3).
    #[must_use]
    pub const fn recovery_retries(mut self, retries: u32) -> Self {
        self.recovery_retries = Some(retries);
        self
    }

    /// Set the graceful drain timeout per worker (default: 30 seconds).
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the anomaly channel capacity (default: 256).
    #[must_use]
    pub const fn anomaly_buffer(mut self, capacity: usize) -> Self {
        self.anomaly_buffer = Some(capacity);
        self
    }

    /// Build the engine and the anomaly side channel.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if a required capability
    /// (topology, capacity, source, sink, changelog) is missing or if
    /// `recovery_retries` is zero.
    pub fn build(self) -> Result<(CarParkEngine, mpsc::Receiver<Anomaly>), EngineError> {
        let topology = self
            .topology
            .ok_or_else(|| EngineError::Configuration("topology not set".to_string()))?;
        let capacity = self
            .capacity
            .ok_or_else(|| EngineError::Configuration("capacity table not set".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| EngineError::Configuration("event source not set".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| EngineError::Configuration("status sink not set".to_string()))?;
        let changelog = self
            .changelog
            .ok_or_else(|| EngineError::Configuration("change log not set".to_string()))?;

        let recovery_retries = self.recovery_retries.unwrap_or(3);
        if recovery_retries == 0 {
            return Err(EngineError::Configuration(
                "recovery_retries must be positive".to_string(),
            ));
        }

        let transformer =
            Arc::new(BarrierEventTransformer::new(Arc::new(capacity)).with_policy(self.policy));
        let (state_tx, _) = watch::channel(EngineState::Created);
        let (anomaly_tx, anomaly_rx) = mpsc::channel(self.anomaly_buffer.unwrap_or(256));
        let (fault_tx, fault_rx) = mpsc::channel(16);

        let engine = CarParkEngine {
            inner: Arc::new(EngineInner {
                topology,
                transformer,
                source,
                sink,
                changelog,
                workers: Mutex::new(HashMap::new()),
                state_tx,
                anomaly_tx,
                fault_tx,
                fault_rx: Mutex::new(Some(fault_rx)),
                on_fatal: Mutex::new(self.on_fatal),
                recovery_retries,
                shutdown_timeout: self.shutdown_timeout.unwrap_or(Duration::from_secs(30)),
            }),
        };

        Ok((engine, anomaly_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_state_display() {
        assert_eq!(format!("{}", EngineState::Rebalancing), "REBALANCING");
        assert_eq!(format!("{}", EngineState::Running), "RUNNING");
    }

    #[test]
    fn builder_rejects_missing_capability() {
        let result = CarParkEngine::builder().build();
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn engine_error_display() {
        let err = EngineError::StoreRecovery {
            partition: PartitionId::new(1),
            reason: "log unreadable".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Recovery failed for partition 1: log unreadable"
        );
    }
}
