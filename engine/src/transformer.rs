//! The barrier event transformer: one stateful reduction step per event.
//!
//! # Overview
//!
//! The transformer is the heart of the engine. For every incoming
//! [`BarrierEvent`] it:
//!
//! 1. Looks up the zone's capacity entry (an unknown zone drops the event
//!    before any state is touched)
//! 2. Reads the current occupancy from the store
//! 3. Applies the direction: `+1` on ENTRY, `-1` on EXIT floored at zero
//! 4. Persists the new count (durable via the change log)
//! 5. Derives the status: `FULL` when the count has reached capacity,
//!    otherwise the count itself
//!
//! The reduction itself is a pure function, [`reduce_occupancy`], so the
//! per-zone state machine is testable without any I/O.
//!
//! # Delivery tolerance
//!
//! The upstream transport is at-least-once: duplicates and reordering
//! across a redelivery boundary are possible. Two policies absorb that:
//!
//! - **Clamp at zero**: a spurious or duplicate EXIT on an empty zone
//!   leaves the count at 0 instead of going negative.
//! - **Capped overshoot**: an ENTRY that would push the count past
//!   capacity persists at most `total + tolerance` (see
//!   [`OvershootPolicy`]) and raises a non-fatal [`Anomaly::Overflow`]
//!   instead of absorbing the overshoot silently.

use carpark_analyzer_core::capacity::{CapacityTable, UnknownZoneError};
use carpark_analyzer_core::event::{BarrierEvent, Direction};
use carpark_analyzer_core::status::{CarParkStatus, Status};
use carpark_analyzer_core::store::{OccupancyStore, StoreError};
use carpark_analyzer_core::zone::ZoneId;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a single transform step.
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    /// The event referenced a zone absent from the capacity table.
    ///
    /// Recovered locally: the event is dropped and reported; other zones
    /// are unaffected.
    #[error("{0}")]
    UnknownZone(#[from] UnknownZoneError),

    /// A store read or write failed.
    ///
    /// Not recoverable per-event: the owning partition must stop rather
    /// than continue against a store in an unknown state.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
}

/// A data-quality signal observed while processing events.
///
/// Anomalies flow on a dedicated side channel, never on the primary status
/// stream, so downstream consumers of availability never see them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anomaly {
    /// An event referenced a zone with no capacity entry; the event was
    /// dropped.
    UnknownZone {
        /// The unconfigured zone.
        zone: ZoneId,
        /// The direction of the dropped crossing.
        direction: Direction,
    },
    /// An ENTRY would have pushed occupancy past capacity; the persisted
    /// count was capped by the overshoot policy.
    Overflow {
        /// The zone that overflowed.
        zone: ZoneId,
        /// The count the ENTRY asked for.
        attempted: u32,
        /// The zone's total capacity.
        capacity: u32,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownZone { zone, direction } => {
                write!(f, "unknown zone {zone} ({direction} dropped)")
            }
            Self::Overflow {
                zone,
                attempted,
                capacity,
            } => write!(
                f,
                "overflow in zone {zone}: attempted {attempted} of {capacity}"
            ),
        }
    }
}

/// Policy for ENTRY events that would exceed a zone's capacity.
///
/// The persisted count never exceeds `total + tolerance`; any attempt to
/// go past `total` is reported as an [`Anomaly::Overflow`] regardless of
/// tolerance. The default is zero tolerance: the count is clamped at
/// capacity.
///
/// # Examples
///
/// ```
/// use carpark_analyzer_engine::transformer::OvershootPolicy;
///
/// let strict = OvershootPolicy::default();
/// assert_eq!(strict.tolerance(), 0);
///
/// let lenient = OvershootPolicy::with_tolerance(2);
/// assert_eq!(lenient.tolerance(), 2);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OvershootPolicy {
    tolerance: u32,
}

impl OvershootPolicy {
    /// Allow the persisted count to exceed capacity by up to `tolerance`.
    #[must_use]
    pub const fn with_tolerance(tolerance: u32) -> Self {
        Self { tolerance }
    }

    /// The number of counts above capacity this policy will persist.
    #[must_use]
    pub const fn tolerance(self) -> u32 {
        self.tolerance
    }
}

/// Result of applying one direction to an occupancy count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// The new occupancy count, after clamping and capping.
    pub count: u32,
    /// Whether an ENTRY attempted to push the count past capacity.
    pub overflowed: bool,
}

/// Apply one barrier crossing to an occupancy count.
///
/// The per-zone state machine: counts live in `[0, total + tolerance]`,
/// ENTRY moves `+1` (capped), EXIT moves `-1` (floored at 0). Pure, so
/// the whole transition space is testable directly.
///
/// # Examples
///
/// ```
/// use carpark_analyzer_core::event::Direction;
/// use carpark_analyzer_engine::transformer::{reduce_occupancy, OvershootPolicy};
///
/// let policy = OvershootPolicy::default();
/// assert_eq!(reduce_occupancy(0, Direction::Entry, 2, policy).count, 1);
/// assert_eq!(reduce_occupancy(0, Direction::Exit, 2, policy).count, 0);
///
/// let capped = reduce_occupancy(2, Direction::Entry, 2, policy);
/// assert_eq!(capped.count, 2);
/// assert!(capped.overflowed);
/// ```
#[must_use]
pub const fn reduce_occupancy(
    count: u32,
    direction: Direction,
    total: u32,
    policy: OvershootPolicy,
) -> Reduction {
    match direction {
        Direction::Entry => {
            let attempted = count.saturating_add(1);
            if attempted > total {
                let cap = total.saturating_add(policy.tolerance);
                let capped = if attempted > cap { cap } else { attempted };
                Reduction {
                    count: capped,
                    overflowed: true,
                }
            } else {
                Reduction {
                    count: attempted,
                    overflowed: false,
                }
            }
        }
        Direction::Exit => Reduction {
            count: count.saturating_sub(1),
            overflowed: false,
        },
    }
}

/// Outcome of one successful transform step.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOutcome {
    /// The zone the status belongs to (the output record key).
    pub zone: ZoneId,
    /// The derived status record.
    pub status: CarParkStatus,
    /// A non-fatal anomaly observed during the step, if any.
    pub anomaly: Option<Anomaly>,
}

/// The stateful reduction step, bound to a capacity snapshot.
///
/// One transformer instance is shared by all partition workers; it holds
/// no mutable state of its own. All mutable state lives in the
/// partition-owned store a worker passes in, which is what keeps zones
/// single-writer without locking.
pub struct BarrierEventTransformer {
    capacity: Arc<CapacityTable>,
    policy: OvershootPolicy,
}

impl BarrierEventTransformer {
    /// Create a transformer over a capacity snapshot with the default
    /// (zero tolerance) overshoot policy.
    #[must_use]
    pub fn new(capacity: Arc<CapacityTable>) -> Self {
        Self {
            capacity,
            policy: OvershootPolicy::default(),
        }
    }

    /// Replace the overshoot policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: OvershootPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The overshoot policy in effect.
    #[must_use]
    pub const fn policy(&self) -> OvershootPolicy {
        self.policy
    }

    /// Apply one event against the given partition store.
    ///
    /// The capacity lookup happens before any store access, so an event
    /// for an unknown zone has no side effects at all.
    ///
    /// # Errors
    ///
    /// - [`TransformError::UnknownZone`] if the zone has no capacity
    ///   entry; the caller drops the event and reports the anomaly.
    /// - [`TransformError::Store`] if the store read or write fails; the
    ///   caller must stop serving the partition.
    pub async fn transform(
        &self,
        store: &dyn OccupancyStore,
        event: &BarrierEvent,
    ) -> Result<TransformOutcome, TransformError> {
        let entry = self.capacity.capacity_of(&event.zone)?;

        let current = store.get(&event.zone).await?;
        let reduction = reduce_occupancy(current, event.direction, entry.total, self.policy);
        store.put(&event.zone, reduction.count).await?;

        let status = if reduction.count >= entry.total {
            Status::Full
        } else {
            Status::Count(reduction.count)
        };

        tracing::debug!(
            zone = %event.zone,
            direction = %event.direction,
            occupancy = reduction.count,
            capacity = entry.total,
            full = status.is_full(),
            "Applied barrier event"
        );

        let anomaly = reduction.overflowed.then(|| Anomaly::Overflow {
            zone: event.zone.clone(),
            attempted: current.saturating_add(1),
            capacity: entry.total,
        });

        Ok(TransformOutcome {
            zone: event.zone.clone(),
            status: CarParkStatus::new(entry.zone_type, status),
            anomaly,
        })
    }
}
