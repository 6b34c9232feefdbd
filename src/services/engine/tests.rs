//! Tests for the journey engine

use super::*;
use crate::domain::sample::{TimestampValue, TransportMode};
use crate::services::distance;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

/// Position source stub that counts watch acquisitions and releases
struct StubSource {
    begins: AtomicU64,
    ends: AtomicU64,
    fail_begin: bool,
}

impl StubSource {
    fn new() -> Self {
        Self { begins: AtomicU64::new(0), ends: AtomicU64::new(0), fail_begin: false }
    }

    fn unavailable() -> Self {
        Self { fail_begin: true, ..Self::new() }
    }

    fn begins(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    fn ends(&self) -> u64 {
        self.ends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionSource for StubSource {
    async fn begin_watch(&self) -> anyhow::Result<()> {
        if self.fail_begin {
            anyhow::bail!("position capability not available");
        }
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end_watch(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test harness that keeps the record store's temp dir alive
struct TestEngine {
    engine: JourneyEngine,
    source: Arc<StubSource>,
    #[allow(dead_code)]
    dir: TempDir,
}

impl std::ops::Deref for TestEngine {
    type Target = JourneyEngine;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl std::ops::DerefMut for TestEngine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

fn create_engine() -> TestEngine {
    create_engine_with_source(Arc::new(StubSource::new()))
}

fn create_engine_with_source(source: Arc<StubSource>) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("records.jsonl");
    let record_store = RecordStore::new(store_path.to_str().unwrap());
    let engine = JourneyEngine::new(
        &Config::default(),
        source.clone(),
        record_store,
        None,
        None,
        Arc::new(Metrics::new()),
    );
    TestEngine { engine, source, dir }
}

fn fix(lat: f64, lon: f64) -> RawFix {
    RawFix {
        latitude: Some(lat),
        longitude: Some(lon),
        speed: Some(5.0),
        timestamp: TimestampValue::EpochMs(1_736_012_345_000),
    }
}

#[test]
fn test_full_journey_lifecycle() {
    let mut engine = create_engine();

    engine.select_transport_and_start("cycling", 0).unwrap();
    assert_eq!(engine.status(), JourneyStatus::Active);
    assert_eq!(engine.journey().mode, Some(TransportMode::Cycling));

    // Two Warsaw fixes roughly 40 m apart
    engine.ingest_fix(&fix(52.2297, 21.0122), 1_000).unwrap();
    engine.ingest_fix(&fix(52.2300, 21.0130), 2_000).unwrap();

    // Irregular ticks at t=60s, 120s, 125s
    engine.tick(60_000);
    engine.tick(120_000);
    assert_eq!(engine.tick(125_000), 125);

    let record = engine.end_journey(125_000).unwrap();
    assert_eq!(engine.status(), JourneyStatus::Finished);
    assert_eq!(record.mode, TransportMode::Cycling);
    assert!((record.distance_km - 0.04).abs() < 0.005, "got {}", record.distance_km);
    assert_eq!(record.route.len(), 2);
    assert_eq!(record.elapsed_seconds, 125);
    assert_eq!(record.elapsed_hms, "00:02:05");
}

#[test]
fn test_fixes_ignored_outside_active() {
    let mut engine = create_engine();

    assert_eq!(engine.ingest_fix(&fix(52.0, 21.0), 0), Ok(FixOutcome::Ignored));
    assert_eq!(engine.journey().distance_km, 0.0);
    assert!(engine.route_snapshot().is_empty());

    engine.select_transport_and_start("walking", 0).unwrap();
    engine.ingest_fix(&fix(52.0, 21.0), 0).unwrap();
    engine.end_journey(1_000).unwrap();

    // Late fix after end: dropped, journey unchanged
    assert_eq!(engine.ingest_fix(&fix(53.0, 22.0), 2_000), Ok(FixOutcome::Ignored));
    assert_eq!(engine.route_snapshot().len(), 1);
    assert!(engine.journey().last_sample.unwrap().latitude == 52.0);
}

#[test]
fn test_start_requires_valid_mode() {
    let mut engine = create_engine();

    let err = engine.select_transport_and_start("", 0).unwrap_err();
    assert_eq!(err, EngineError::InvalidTransportMode(String::new()));

    let err = engine.select_transport_and_start("teleport", 0).unwrap_err();
    assert_eq!(err, EngineError::InvalidTransportMode("teleport".to_string()));

    // No state change on failure
    assert_eq!(engine.status(), JourneyStatus::NotStarted);
    assert!(engine.journey().mode.is_none());
}

#[test]
fn test_start_requires_not_started() {
    let mut engine = create_engine();
    engine.select_transport_and_start("running", 0).unwrap();

    let err = engine.select_transport_and_start("running", 1_000).unwrap_err();
    assert_eq!(
        err,
        EngineError::IllegalTransition { op: "start", status: JourneyStatus::Active }
    );

    engine.end_journey(5_000).unwrap();
    let err = engine.select_transport_and_start("running", 6_000).unwrap_err();
    assert_eq!(
        err,
        EngineError::IllegalTransition { op: "start", status: JourneyStatus::Finished }
    );
}

#[test]
fn test_invalid_sample_does_not_mutate() {
    let mut engine = create_engine();
    engine.select_transport_and_start("driving", 0).unwrap();
    engine.ingest_fix(&fix(52.0, 21.0), 0).unwrap();

    let err = engine.ingest_fix(&fix(200.0, 21.0), 1_000).unwrap_err();
    assert!(matches!(err, EngineError::InvalidSample(_)));

    // Journey untouched by the rejected sample
    assert_eq!(engine.route_snapshot().len(), 1);
    assert_eq!(engine.journey().last_sample.unwrap().latitude, 52.0);
    assert_eq!(engine.journey().distance_km, 0.0);
}

#[test]
fn test_distance_monotonic_and_gate_applied() {
    let mut engine = create_engine();
    engine.select_transport_and_start("walking", 0).unwrap();

    let path = [
        (52.2297, 21.0122),
        // sub-meter jitter: recorded, not counted
        (52.229_700_5, 21.012_200_5),
        (52.2300, 21.0130),
        (52.2305, 21.0140),
    ];

    let mut last_distance = 0.0;
    let mut counted_sum = 0.0;
    for (i, (lat, lon)) in path.iter().enumerate() {
        let outcome = engine.ingest_fix(&fix(*lat, *lon), i as u64 * 1_000).unwrap();
        let distance = engine.journey().distance_km;
        assert!(distance >= last_distance, "distance must be non-decreasing");
        last_distance = distance;

        if let FixOutcome::Recorded { increment_km, counted: true } = outcome {
            counted_sum += increment_km;
        }
    }

    // Route records every normalized sample, counted or not
    assert_eq!(engine.route_snapshot().len(), path.len());
    // Distance is exactly the sum of counted increments
    assert!((engine.journey().distance_km - counted_sum).abs() < 1e-12);

    // The jitter hop itself was below the gate
    let jitter = distance::haversine_km(path[0].0, path[0].1, path[1].0, path[1].1);
    assert!(jitter < engine.noise_gate_km);
}

#[test]
fn test_end_requires_active() {
    let mut engine = create_engine();

    let err = engine.end_journey(0).unwrap_err();
    assert_eq!(
        err,
        EngineError::IllegalTransition { op: "end", status: JourneyStatus::NotStarted }
    );
    assert_eq!(engine.status(), JourneyStatus::NotStarted);
}

#[test]
fn test_record_reflects_end_instant() {
    let mut engine = create_engine();
    engine.select_transport_and_start("cycling", 0).unwrap();
    engine.ingest_fix(&fix(52.2297, 21.0122), 1_000).unwrap();
    engine.tick(30_000);

    let record = engine.end_journey(30_000).unwrap();
    let distance_at_end = record.distance_km;
    let route_at_end = record.route.clone();

    // Anything after end is ignored and cannot leak into the record
    assert_eq!(engine.ingest_fix(&fix(52.3, 21.1), 31_000), Ok(FixOutcome::Ignored));
    engine.tick(90_000);

    assert_eq!(record.distance_km, distance_at_end);
    assert_eq!(record.route, route_at_end);
    assert_eq!(record.elapsed_seconds, 30);
    assert_eq!(engine.journey().elapsed_seconds, 30);
}

#[test]
fn test_reset_is_idempotent_from_finished() {
    let mut engine = create_engine();
    engine.select_transport_and_start("running", 0).unwrap();
    engine.ingest_fix(&fix(52.0, 21.0), 1_000).unwrap();
    engine.tick(10_000);
    engine.end_journey(10_000).unwrap();

    assert_eq!(engine.reset(), JourneyStatus::Finished);
    let zeroed = engine.journey().clone();
    assert_eq!(zeroed, Journey::new());
    assert!(engine.route_snapshot().is_empty());

    // Second reset in a row is safe and yields the identical zeroed journey
    assert_eq!(engine.reset(), JourneyStatus::NotStarted);
    assert_eq!(engine.journey(), &zeroed);
    assert!(engine.route_snapshot().is_empty());
}

#[test]
fn test_reset_abandons_active_journey() {
    let mut engine = create_engine();
    engine.select_transport_and_start("driving", 0).unwrap();
    engine.ingest_fix(&fix(52.0, 21.0), 1_000).unwrap();

    assert_eq!(engine.reset(), JourneyStatus::Active);
    assert_eq!(engine.status(), JourneyStatus::NotStarted);
    assert_eq!(engine.journey().distance_km, 0.0);
    assert!(engine.route_snapshot().is_empty());

    // Engine is reusable for a fresh journey
    engine.select_transport_and_start("walking", 2_000).unwrap();
    assert_eq!(engine.status(), JourneyStatus::Active);
}

#[test]
fn test_tick_noop_outside_active() {
    let mut engine = create_engine();
    assert_eq!(engine.tick(99_000), 0);

    engine.select_transport_and_start("walking", 0).unwrap();
    engine.tick(5_000);
    engine.end_journey(5_000).unwrap();

    // Frozen after end
    assert_eq!(engine.tick(60_000), 5);
}

#[tokio::test]
async fn test_handle_start_acquires_watch() {
    let mut engine = create_engine();

    engine.process_event(EngineEvent::Command(Command::Start { mode: "cycling".to_string() }))
        .await;

    assert_eq!(engine.status(), JourneyStatus::Active);
    assert_eq!(engine.source.begins(), 1);
    assert_eq!(engine.source.ends(), 0);
}

#[tokio::test]
async fn test_positioning_unavailable_keeps_journey_not_started() {
    let mut engine = create_engine_with_source(Arc::new(StubSource::unavailable()));

    engine.process_event(EngineEvent::Command(Command::Start { mode: "walking".to_string() }))
        .await;

    assert_eq!(engine.status(), JourneyStatus::NotStarted);
    assert_eq!(engine.source.ends(), 0);
}

#[tokio::test]
async fn test_end_releases_watch_exactly_once() {
    let mut engine = create_engine();
    engine.process_event(EngineEvent::Command(Command::Start { mode: "running".to_string() }))
        .await;
    engine.process_event(EngineEvent::Fix(fix(52.2297, 21.0122))).await;
    engine.process_event(EngineEvent::Command(Command::End)).await;

    assert_eq!(engine.status(), JourneyStatus::Finished);
    assert_eq!(engine.source.ends(), 1);

    // A follow-up reset must not release again
    engine.process_event(EngineEvent::Command(Command::Reset)).await;
    assert_eq!(engine.source.ends(), 1);
}

#[tokio::test]
async fn test_reset_releases_watch_when_abandoning() {
    let mut engine = create_engine();
    engine.process_event(EngineEvent::Command(Command::Start { mode: "cycling".to_string() }))
        .await;
    engine.process_event(EngineEvent::Command(Command::Reset)).await;

    assert_eq!(engine.status(), JourneyStatus::NotStarted);
    assert_eq!(engine.source.ends(), 1);
}

#[tokio::test]
async fn test_end_command_outside_active_is_surfaced_not_fatal() {
    let mut engine = create_engine();
    engine.process_event(EngineEvent::Command(Command::End)).await;

    assert_eq!(engine.status(), JourneyStatus::NotStarted);

    // Engine still fully usable afterwards
    engine.process_event(EngineEvent::Command(Command::Start { mode: "walking".to_string() }))
        .await;
    assert_eq!(engine.status(), JourneyStatus::Active);
}

#[tokio::test]
async fn test_source_error_does_not_end_journey() {
    let mut engine = create_engine();
    engine.process_event(EngineEvent::Command(Command::Start { mode: "walking".to_string() }))
        .await;
    engine.process_event(EngineEvent::Fix(fix(52.0, 21.0))).await;

    engine.process_event(EngineEvent::SourceError("signal lost".to_string())).await;

    assert_eq!(engine.status(), JourneyStatus::Active);
    assert_eq!(engine.route_snapshot().len(), 1);
}

#[tokio::test]
async fn test_run_loop_shutdown_releases_watch() {
    let engine = create_engine();
    let source = engine.source.clone();
    let (event_tx, event_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    event_tx
        .send(EngineEvent::Command(Command::Start { mode: "cycling".to_string() }))
        .await
        .unwrap();

    let handle = tokio::spawn(async move {
        let mut engine = engine;
        engine.engine.run(event_rx, shutdown_rx).await;
        engine
    });

    // Give the loop a moment to process the start command
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let engine = handle.await.unwrap();
    assert_eq!(source.begins(), 1);
    assert_eq!(source.ends(), 1);
    assert_eq!(engine.status(), JourneyStatus::Active);
}
