//! # Car Park Analyzer Engine
//!
//! The stateful, partitioned event-to-state reduction engine: for every
//! incoming barrier event it mutates zone-scoped occupancy state held in a
//! durable, recoverable local store and emits a derived availability
//! record, while the underlying event log may be partitioned, rebalanced
//! across workers, and replayed after failure.
//!
//! ## Pieces
//!
//! - [`transformer::BarrierEventTransformer`]: the reduction step (ENTRY
//!   `+1`, EXIT `-1` floored at zero, FULL at capacity)
//! - [`store::ZonePartitionStore`]: change-log backed occupancy state for
//!   one partition, recovered before it serves
//! - [`topology::Topology`]: declaration of source, transform + store, sink
//! - [`engine::CarParkEngine`]: lifecycle — explicit partition ownership,
//!   recovery with bounded retries, graceful drain, fatal-fault callback
//!
//! ## Guarantees
//!
//! - **Per-zone order**: one worker per partition, events applied
//!   sequentially; ingestion order = application order = emission order
//!   for every zone.
//! - **No stale state**: a partition is never served before its change
//!   log replay completes.
//! - **At-least-once tolerance**: duplicate or out-of-order deliveries
//!   cannot drive a count negative or silently past capacity.
//!
//! ## Quick start
//!
//! ```ignore
//! let (engine, anomalies) = CarParkEngine::builder()
//!     .topology(topology)
//!     .capacity(capacity_table)
//!     .source(Arc::new(source))
//!     .sink(Arc::new(sink))
//!     .changelog(Arc::new(changelog))
//!     .build()?;
//!
//! engine.start(&engine.partition_ids()).await?;
//! ```

pub mod engine;
pub mod store;
pub mod topology;
pub mod transformer;

mod worker;

pub use engine::{CarParkEngine, CarParkEngineBuilder, EngineError, EngineState, FatalHandler};
pub use store::ZonePartitionStore;
pub use topology::{Topology, TopologyBuilder, TopologyError};
pub use transformer::{
    Anomaly, BarrierEventTransformer, OvershootPolicy, Reduction, TransformError,
    TransformOutcome, reduce_occupancy,
};
