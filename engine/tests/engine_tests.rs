//! End-to-end tests for the reduction engine over in-memory capabilities.
//!
//! These tests drive the full pipeline: events pushed onto partition
//! queues, the engine recovering and transforming, statuses read back from
//! the sink, anomalies from the side channel.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use carpark_analyzer_core::capacity::ZoneType;
use carpark_analyzer_core::status::Status;
use carpark_analyzer_core::store::Changelog;
use carpark_analyzer_core::transport::{BarrierEventSource, StatusSink, TransportError};
use carpark_analyzer_core::zone::{PartitionId, ZoneId};
use carpark_analyzer_engine::{
    Anomaly, CarParkEngine, EngineError, EngineState, OvershootPolicy, Topology,
};
use carpark_analyzer_testing::fixtures::{capacity_table, entry, exit};
use carpark_analyzer_testing::{InMemoryBarrierBus, InMemoryChangelog};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

fn topology(partitions: u32) -> Topology {
    Topology::builder()
        .source_topic("carpark-barrier-events")
        .output_topic("carpark-availability")
        .store_name("carpark-zone-store")
        .changelog_topic("carpark-zone-store-changelog")
        .partitions(partitions)
        .build()
        .expect("valid topology")
}

struct Harness {
    engine: CarParkEngine,
    anomalies: mpsc::Receiver<Anomaly>,
    bus: InMemoryBarrierBus,
    changelog: Arc<InMemoryChangelog>,
}

fn harness(partitions: u32, zones: &[(&str, u32, ZoneType)]) -> Harness {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());

    let (engine, anomalies) = CarParkEngine::builder()
        .topology(topology(partitions))
        .capacity(capacity_table(zones))
        .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
        .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
        .changelog(Arc::clone(&changelog) as Arc<dyn Changelog>)
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .expect("valid engine configuration");

    Harness {
        engine,
        anomalies,
        bus,
        changelog,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within timeout");
}

#[tokio::test]
async fn two_entries_fill_a_two_space_zone() {
    let mut h = harness(1, &[("zone-a", 2, ZoneType::General)]);
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    let p = PartitionId::new(0);
    h.bus.push(p, entry("zone-a"));
    h.bus.push(p, entry("zone-a"));

    let zone = ZoneId::new("zone-a");
    wait_until(|| h.bus.statuses_for(&zone).len() == 2).await;

    let statuses: Vec<Status> = h
        .bus
        .statuses_for(&zone)
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(statuses, vec![Status::Count(1), Status::Full]);
    assert_eq!(h.bus.statuses_for(&zone)[0].zone_type, ZoneType::General);

    assert!(h.anomalies.try_recv().is_err(), "no anomaly expected");
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn exit_from_full_reverts_to_numeric_count() {
    let h = harness(1, &[("zone-a", 2, ZoneType::General)]);
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    let p = PartitionId::new(0);
    h.bus.push(p, entry("zone-a"));
    h.bus.push(p, entry("zone-a"));
    h.bus.push(p, exit("zone-a"));

    let zone = ZoneId::new("zone-a");
    wait_until(|| h.bus.statuses_for(&zone).len() == 3).await;

    let statuses: Vec<Status> = h
        .bus
        .statuses_for(&zone)
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(
        statuses,
        vec![Status::Count(1), Status::Full, Status::Count(1)]
    );
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_zone_is_reported_and_skipped() {
    let mut h = harness(1, &[("zone-a", 2, ZoneType::General)]);
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    let p = PartitionId::new(0);
    h.bus.push(p, entry("zone-b"));
    h.bus.push(p, entry("zone-a"));

    // The later zone-a event is processed, so zone-b was dropped, not stuck.
    let zone_a = ZoneId::new("zone-a");
    wait_until(|| h.bus.statuses_for(&zone_a).len() == 1).await;

    assert!(h.bus.statuses_for(&ZoneId::new("zone-b")).is_empty());

    let anomaly = tokio::time::timeout(Duration::from_secs(1), h.anomalies.recv())
        .await
        .expect("anomaly within timeout")
        .expect("channel open");
    assert!(matches!(
        anomaly,
        Anomaly::UnknownZone { zone, .. } if zone == ZoneId::new("zone-b")
    ));

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn spurious_exit_clamps_at_zero_then_fills() {
    let h = harness(1, &[("zone-a", 1, ZoneType::General)]);
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    let p = PartitionId::new(0);
    h.bus.push(p, exit("zone-a"));
    h.bus.push(p, entry("zone-a"));

    let zone = ZoneId::new("zone-a");
    wait_until(|| h.bus.statuses_for(&zone).len() == 2).await;

    let statuses: Vec<Status> = h
        .bus
        .statuses_for(&zone)
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(statuses, vec![Status::Count(0), Status::Full]);
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn overflow_is_reported_on_the_side_channel_only() {
    let mut h = harness(1, &[("zone-a", 1, ZoneType::Reserved)]);
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    let p = PartitionId::new(0);
    h.bus.push(p, entry("zone-a"));
    h.bus.push(p, entry("zone-a"));

    let zone = ZoneId::new("zone-a");
    wait_until(|| h.bus.statuses_for(&zone).len() == 2).await;

    // The display stays clamped at FULL; the overshoot shows up as an anomaly.
    let statuses: Vec<Status> = h
        .bus
        .statuses_for(&zone)
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(statuses, vec![Status::Full, Status::Full]);

    let anomaly = tokio::time::timeout(Duration::from_secs(1), h.anomalies.recv())
        .await
        .expect("anomaly within timeout")
        .expect("channel open");
    assert_eq!(
        anomaly,
        Anomaly::Overflow {
            zone: zone.clone(),
            attempted: 2,
            capacity: 1,
        }
    );

    // The persisted count never went past capacity.
    let records = h.changelog.records(p);
    assert!(records.iter().all(|r| r.count <= 1));

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn zones_reduce_independently_across_partitions() {
    let h = harness(
        2,
        &[
            ("zone-a", 5, ZoneType::General),
            ("zone-b", 5, ZoneType::Shift),
        ],
    );
    h.engine.start(&h.engine.partition_ids()).await.unwrap();

    // Interleave two zones on two partitions.
    h.bus.push(PartitionId::new(0), entry("zone-a"));
    h.bus.push(PartitionId::new(1), entry("zone-b"));
    h.bus.push(PartitionId::new(0), entry("zone-a"));
    h.bus.push(PartitionId::new(1), exit("zone-b"));
    h.bus.push(PartitionId::new(0), exit("zone-a"));

    let zone_a = ZoneId::new("zone-a");
    let zone_b = ZoneId::new("zone-b");
    wait_until(|| h.bus.statuses_for(&zone_a).len() == 3 && h.bus.statuses_for(&zone_b).len() == 2)
        .await;

    let a: Vec<Status> = h
        .bus
        .statuses_for(&zone_a)
        .iter()
        .map(|s| s.status)
        .collect();
    let b: Vec<Status> = h
        .bus
        .statuses_for(&zone_b)
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(a, vec![Status::Count(1), Status::Count(2), Status::Count(1)]);
    assert_eq!(b, vec![Status::Count(1), Status::Count(0)]);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn ownership_transfer_resumes_from_last_committed_count() {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());
    let zones = [("zone-a", 5, ZoneType::General)];
    let p = PartitionId::new(0);

    let build = |bus: &InMemoryBarrierBus, changelog: &Arc<InMemoryChangelog>| {
        CarParkEngine::builder()
            .topology(topology(1))
            .capacity(capacity_table(&zones))
            .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
            .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
            .changelog(Arc::clone(changelog) as Arc<dyn Changelog>)
            .build()
            .expect("valid engine configuration")
    };

    // Worker 1 processes two entries, then releases the partition.
    let (first, _anomalies1) = build(&bus, &changelog);
    first.start(&[p]).await.unwrap();

    bus.push(p, entry("zone-a"));
    bus.push(p, entry("zone-a"));
    let zone = ZoneId::new("zone-a");
    wait_until(|| bus.statuses_for(&zone).len() == 2).await;
    first.stop().await.unwrap();
    assert_eq!(first.current_state(), EngineState::Stopped);

    // Worker 2 takes over the same change log and must see occupancy 2
    // before accepting new events.
    bus.clear_statuses();
    let (second, _anomalies2) = build(&bus, &changelog);
    second.start(&[p]).await.unwrap();

    bus.push(p, entry("zone-a"));
    wait_until(|| bus.statuses_for(&zone).len() == 1).await;

    assert_eq!(bus.statuses_for(&zone)[0].status, Status::Count(3));
    second.stop().await.unwrap();
}

#[tokio::test]
async fn recovery_failure_keeps_partition_out_of_service_and_escalates() {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());
    changelog.poison(PartitionId::new(0));

    let fatal_seen = Arc::new(AtomicBool::new(false));
    let fatal_flag = Arc::clone(&fatal_seen);

    let (engine, _anomalies) = CarParkEngine::builder()
        .topology(topology(1))
        .capacity(capacity_table(&[("zone-a", 2, ZoneType::General)]))
        .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
        .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
        .changelog(Arc::clone(&changelog) as Arc<dyn Changelog>)
        .recovery_retries(2)
        .on_fatal(move |err| {
            assert!(matches!(err, EngineError::StoreRecovery { .. }));
            fatal_flag.store(true, Ordering::Release);
        })
        .build()
        .expect("valid engine configuration");

    let result = engine.start(&[PartitionId::new(0)]).await;
    assert!(matches!(
        result,
        Err(EngineError::StoreRecovery { partition, .. }) if partition == PartitionId::new(0)
    ));

    // The partition is not served.
    assert!(engine.assigned_partitions().await.is_empty());

    // Repeated failure escalates to the fatal callback.
    wait_until(|| fatal_seen.load(Ordering::Acquire)).await;
}

#[tokio::test]
async fn transport_failure_stops_the_engine_cleanly() {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());

    let fatal_seen = Arc::new(AtomicBool::new(false));
    let fatal_flag = Arc::clone(&fatal_seen);

    let (engine, _anomalies) = CarParkEngine::builder()
        .topology(topology(1))
        .capacity(capacity_table(&[("zone-a", 2, ZoneType::General)]))
        .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
        .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
        .changelog(Arc::clone(&changelog) as Arc<dyn Changelog>)
        .on_fatal(move |err| {
            assert!(matches!(err, EngineError::Transport(_)));
            fatal_flag.store(true, Ordering::Release);
        })
        .build()
        .expect("valid engine configuration");

    engine.start(&[PartitionId::new(0)]).await.unwrap();

    bus.push_error(
        PartitionId::new(0),
        TransportError::Other("broker gone".to_string()),
    );

    wait_until(|| fatal_seen.load(Ordering::Acquire)).await;

    let mut state = engine.state();
    tokio::time::timeout(Duration::from_secs(2), async {
        while *state.borrow() != EngineState::Stopped {
            state.changed().await.expect("state channel open");
        }
    })
    .await
    .expect("engine drains after fatal fault");
}

#[tokio::test]
async fn graceful_stop_flushes_state_for_the_next_owner() {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());
    let zones = [("zone-a", 10, ZoneType::General)];
    let p = PartitionId::new(0);

    let (engine, _anomalies) = CarParkEngine::builder()
        .topology(topology(1))
        .capacity(capacity_table(&zones))
        .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
        .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
        .changelog(Arc::clone(&changelog) as Arc<dyn Changelog>)
        .build()
        .expect("valid engine configuration");
    engine.start(&[p]).await.unwrap();

    for _ in 0..4 {
        bus.push(p, entry("zone-a"));
    }
    let zone = ZoneId::new("zone-a");
    wait_until(|| bus.statuses_for(&zone).len() == 4).await;

    engine.stop().await.unwrap();

    // Every processed write is in the change log; the last record carries
    // the final count.
    let records = changelog.records(p);
    assert_eq!(records.len(), 4);
    assert_eq!(records.last().unwrap().count, 4);
}

#[tokio::test]
async fn engine_state_is_observable() {
    let h = harness(1, &[("zone-a", 2, ZoneType::General)]);
    assert_eq!(h.engine.current_state(), EngineState::Created);

    h.engine.start(&h.engine.partition_ids()).await.unwrap();
    assert_eq!(h.engine.current_state(), EngineState::Running);
    assert_eq!(
        h.engine.assigned_partitions().await,
        vec![PartitionId::new(0)]
    );

    h.engine.stop().await.unwrap();
    assert_eq!(h.engine.current_state(), EngineState::Stopped);
}

#[tokio::test]
async fn assignment_is_explicit_ownership() {
    let h = harness(2, &[("zone-a", 2, ZoneType::General)]);
    h.engine.start(&[PartitionId::new(0)]).await.unwrap();

    // Owning a partition twice is a caller bug.
    assert!(matches!(
        h.engine.assign(PartitionId::new(0)).await,
        Err(EngineError::AlreadyAssigned(_))
    ));

    // Releasing a partition the engine never owned is one too.
    assert!(matches!(
        h.engine.revoke(PartitionId::new(1)).await,
        Err(EngineError::NotAssigned(_))
    ));

    // A real rebalance: pick up the second shard, hand back the first.
    h.engine.assign(PartitionId::new(1)).await.unwrap();
    h.engine.revoke(PartitionId::new(0)).await.unwrap();
    assert_eq!(
        h.engine.assigned_partitions().await,
        vec![PartitionId::new(1)]
    );

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn overshoot_tolerance_is_configurable() {
    let bus = InMemoryBarrierBus::new();
    let changelog = Arc::new(InMemoryChangelog::new());
    let p = PartitionId::new(0);

    let (engine, mut anomalies) = CarParkEngine::builder()
        .topology(topology(1))
        .capacity(capacity_table(&[("zone-a", 1, ZoneType::General)]))
        .source(Arc::new(bus.clone()) as Arc<dyn BarrierEventSource>)
        .sink(Arc::new(bus.clone()) as Arc<dyn StatusSink>)
        .changelog(Arc::clone(&changelog) as Arc<dyn Changelog>)
        .overshoot_policy(OvershootPolicy::with_tolerance(1))
        .build()
        .expect("valid engine configuration");
    engine.start(&[p]).await.unwrap();

    bus.push(p, entry("zone-a"));
    bus.push(p, entry("zone-a"));

    let zone = ZoneId::new("zone-a");
    wait_until(|| bus.statuses_for(&zone).len() == 2).await;

    // Display stays clamped at FULL, but the tolerant policy persists the
    // overshoot and still reports it.
    assert_eq!(bus.statuses_for(&zone)[1].status, Status::Full);
    assert_eq!(changelog.records(p).last().unwrap().count, 2);

    let anomaly = tokio::time::timeout(Duration::from_secs(1), anomalies.recv())
        .await
        .expect("anomaly within timeout")
        .expect("channel open");
    assert!(matches!(anomaly, Anomaly::Overflow { attempted: 2, .. }));

    engine.stop().await.unwrap();
}
