//! Journey lifecycle state machine and event loop
//!
//! The engine owns the single in-flight Journey and is the only component
//! other systems may call. It coordinates:
//! - Sample normalization and noise-gated distance accumulation
//! - Route recording
//! - Wall-clock-anchored elapsed time
//! - Position watch lifecycle (acquired on `active` entry, released exactly
//!   once on every exit path)
//! - Record fan-out to the record store, remote sink, and live feed

mod ops;
#[cfg(test)]
mod tests;

use crate::domain::journey::{epoch_ms, format_hms, Journey, JourneyRecord, JourneyStatus};
use crate::domain::sample::{RawFix, SampleError, SpeedUnit};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::live_feed::{AlertPayload, FeedSender, StatusPayload};
use crate::io::position::PositionSource;
use crate::io::record_store::RecordStore;
use crate::services::elapsed::ElapsedClock;
use crate::services::route::RouteBuffer;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use ops::FixOutcome;

/// Events consumed by the engine loop
#[derive(Debug)]
pub enum EngineEvent {
    /// Raw fix from the positioning source
    Fix(RawFix),
    /// The positioning source's error channel
    SourceError(String),
    /// Journey control command
    Command(Command),
}

/// Journey control commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { mode: String },
    End,
    Reset,
}

/// Typed failure of an engine operation.
///
/// All variants are local-recoverable; none is fatal to the engine, and a
/// failed operation never leaves the journey partially mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed or out-of-range fix; the journey continues
    InvalidSample(SampleError),
    /// Unknown or empty transport mode; the journey cannot start
    InvalidTransportMode(String),
    /// Operation not valid for the current lifecycle state
    IllegalTransition { op: &'static str, status: JourneyStatus },
    /// The position watch could not be acquired; the journey stays
    /// `not_started`
    PositioningUnavailable(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidSample(_) => "invalid_sample",
            EngineError::InvalidTransportMode(_) => "invalid_transport_mode",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::PositioningUnavailable(_) => "positioning_unavailable",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSample(e) => write!(f, "invalid sample: {e}"),
            EngineError::InvalidTransportMode(mode) if mode.is_empty() => {
                write!(f, "no transport mode selected")
            }
            EngineError::InvalidTransportMode(mode) => write!(f, "unknown transport mode {mode:?}"),
            EngineError::IllegalTransition { op, status } => {
                write!(f, "cannot {op} while journey is {}", status.as_str())
            }
            EngineError::PositioningUnavailable(message) => {
                write!(f, "positioning unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// The journey tracking engine
pub struct JourneyEngine {
    pub(crate) journey: Journey,
    pub(crate) route: RouteBuffer,
    pub(crate) clock: ElapsedClock,
    pub(crate) user_id: String,
    pub(crate) noise_gate_km: f64,
    pub(crate) speed_unit: SpeedUnit,
    tick_interval: Duration,
    /// Positioning collaborator; watched only while a journey is active
    source: Arc<dyn PositionSource>,
    /// Whether the position watch is currently held. Guards exactly-once
    /// release on every exit from `active`.
    watch_active: bool,
    record_store: RecordStore,
    remote_tx: Option<mpsc::Sender<JourneyRecord>>,
    feed: Option<FeedSender>,
    metrics: Arc<Metrics>,
}

impl JourneyEngine {
    pub fn new(
        config: &Config,
        source: Arc<dyn PositionSource>,
        record_store: RecordStore,
        remote_tx: Option<mpsc::Sender<JourneyRecord>>,
        feed: Option<FeedSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            journey: Journey::new(),
            route: RouteBuffer::new(),
            clock: ElapsedClock::new(),
            user_id: config.user_id().to_string(),
            noise_gate_km: config.noise_gate_km(),
            speed_unit: config.speed_unit(),
            tick_interval: Duration::from_millis(config.tick_interval_ms()),
            source,
            watch_active: false,
            record_store,
            remote_tx,
            feed,
            metrics,
        }
    }

    /// Current lifecycle state
    #[inline]
    pub fn status(&self) -> JourneyStatus {
        self.journey.status
    }

    /// Read-only view of the journey aggregate
    pub fn journey(&self) -> &Journey {
        &self.journey
    }

    /// Owned copy of the current route for rendering/export
    pub fn route_snapshot(&self) -> Vec<[f64; 2]> {
        self.route.snapshot()
    }

    /// Current elapsed time formatted as `HH:MM:SS`
    pub fn elapsed_hms(&self) -> String {
        format_hms(self.journey.elapsed_seconds)
    }

    /// Run the engine, consuming events until shutdown or channel close.
    ///
    /// The tick interval exists only while a journey is active; it is
    /// created on `active` entry and dropped on exit, alongside the
    /// position watch.
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker: Option<Interval> = None;
        info!(user = %self.user_id, "engine_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.release_watch().await;
                        info!("engine_shutdown");
                        return;
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.process_event(event).await,
                        None => {
                            self.release_watch().await;
                            info!("engine_event_channel_closed");
                            return;
                        }
                    }
                    self.sync_ticker(&mut ticker);
                }
                _ = tick_ready(&mut ticker) => {
                    self.handle_tick();
                }
            }
        }
    }

    /// Process a single event, dispatching to the appropriate handler
    pub async fn process_event(&mut self, event: EngineEvent) {
        let process_start = Instant::now();

        match event {
            EngineEvent::Fix(raw) => self.handle_fix(raw),
            EngineEvent::SourceError(message) => self.handle_source_error(message),
            EngineEvent::Command(command) => match command {
                Command::Start { mode } => self.handle_start(&mode).await,
                Command::End => self.handle_end().await,
                Command::Reset => self.handle_reset().await,
            },
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    pub(crate) async fn handle_start(&mut self, mode: &str) {
        if let Err(e) = self.validate_start(mode).map(|_| ()) {
            self.surface_error(&e);
            return;
        }

        // Acquire the position watch before any state change; the journey
        // must not enter `active` without a live source.
        if let Err(e) = self.source.begin_watch().await {
            let e = EngineError::PositioningUnavailable(e.to_string());
            self.surface_error(&e);
            return;
        }
        self.watch_active = true;

        let now_ms = epoch_ms();
        if let Err(e) = self.select_transport_and_start(mode, now_ms) {
            // Already validated above, so this path should not trigger; if
            // it does, the watch must not leak.
            self.release_watch().await;
            self.surface_error(&e);
            return;
        }

        self.metrics.record_journey_started();
        info!(mode = %mode, started_at_ms = %now_ms, "journey_started");
        self.publish_status();
    }

    fn handle_fix(&mut self, raw: RawFix) {
        self.metrics.record_fix_received();

        match self.ingest_fix(&raw, epoch_ms()) {
            Ok(FixOutcome::Ignored) => {
                self.metrics.record_fix_ignored();
                debug!(status = %self.journey.status.as_str(), "fix_ignored");
            }
            Ok(FixOutcome::Recorded { increment_km, counted }) => {
                if counted {
                    self.metrics.record_fix_accepted();
                } else {
                    self.metrics.record_fix_below_gate();
                    debug!(
                        increment_km = %format!("{increment_km:.6}"),
                        "fix_below_noise_gate"
                    );
                }
                self.publish_status();
            }
            Err(e) => {
                self.metrics.record_fix_rejected();
                self.surface_error(&e);
            }
        }
    }

    fn handle_source_error(&mut self, message: String) {
        self.metrics.record_source_error();
        warn!(message = %message, "positioning_source_error");
        if let Some(feed) = &self.feed {
            feed.send_alert(AlertPayload {
                user: self.user_id.clone(),
                ts: epoch_ms(),
                kind: "positioning_error".to_string(),
                message,
            });
        }
    }

    pub(crate) async fn handle_end(&mut self) {
        match self.end_journey(epoch_ms()) {
            Ok(record) => {
                self.release_watch().await;
                self.metrics.record_journey_completed();
                info!(
                    id = %record.id,
                    mode = %record.mode,
                    distance_km = %format!("{:.3}", record.distance_km),
                    elapsed = %record.elapsed_hms,
                    points = %record.route.len(),
                    "journey_completed"
                );

                self.record_store.write_record(&record);
                if let Some(tx) = &self.remote_tx {
                    if tx.try_send(record.clone()).is_err() {
                        warn!(id = %record.id, "remote_sink_queue_full");
                    }
                }
                if let Some(feed) = &self.feed {
                    feed.send_journey(record);
                }
                self.publish_status();
            }
            Err(e) => self.surface_error(&e),
        }
    }

    pub(crate) async fn handle_reset(&mut self) {
        let prior = self.reset();
        if prior == JourneyStatus::Active {
            self.release_watch().await;
            self.metrics.record_journey_abandoned();
            info!("journey_abandoned");
        }
        info!(prior = %prior.as_str(), "journey_reset");
        self.publish_status();
    }

    fn handle_tick(&mut self) {
        if self.journey.status != JourneyStatus::Active {
            return;
        }
        let elapsed = self.tick(epoch_ms());
        debug!(elapsed_seconds = %elapsed, "tick");
        self.publish_status();
    }

    /// Release the position watch, at most once per acquisition.
    async fn release_watch(&mut self) {
        if self.watch_active {
            self.watch_active = false;
            self.source.end_watch().await;
        }
    }

    /// Keep the tick interval in lockstep with the lifecycle state.
    fn sync_ticker(&self, ticker: &mut Option<Interval>) {
        let active = self.journey.status == JourneyStatus::Active;
        if active && ticker.is_none() {
            let mut tick = interval(self.tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            *ticker = Some(tick);
        } else if !active && ticker.is_some() {
            *ticker = None;
        }
    }

    fn publish_status(&self) {
        let Some(feed) = &self.feed else { return };
        let journey = &self.journey;
        feed.send_status(StatusPayload {
            user: self.user_id.clone(),
            ts: epoch_ms(),
            state: journey.status.as_str().to_string(),
            mode: journey.mode.map(|m| m.as_str().to_string()),
            latitude: journey.last_sample.map(|s| s.latitude),
            longitude: journey.last_sample.map(|s| s.longitude),
            speed_kmh: journey.last_sample.map(|s| s.speed_kmh),
            distance_km: journey.distance_km,
            elapsed_seconds: journey.elapsed_seconds,
            elapsed_hms: format_hms(journey.elapsed_seconds),
            route_points: self.route.len(),
        });
    }

    fn surface_error(&self, error: &EngineError) {
        warn!(kind = %error.kind(), error = %error, "engine_error");
        if let Some(feed) = &self.feed {
            feed.send_alert(AlertPayload {
                user: self.user_id.clone(),
                ts: epoch_ms(),
                kind: error.kind().to_string(),
                message: error.to_string(),
            });
        }
    }
}

/// Await the next tick of an optional interval; pends forever while no
/// interval exists, so the select branch is inert outside `active`.
async fn tick_ready(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
