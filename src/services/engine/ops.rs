//! State-machine operations
//!
//! The five public operations of the engine. Each validates fully before
//! mutating, so a typed failure never leaves the journey partially updated.

use super::{EngineError, JourneyEngine};
use crate::domain::journey::{Journey, JourneyRecord, JourneyStatus};
use crate::domain::sample::{GeoSample, RawFix, TransportMode};
use crate::services::distance;

/// Result of feeding one raw fix to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// No journey active; the fix was dropped without touching state
    Ignored,
    /// The fix was validated and recorded in the route
    Recorded {
        /// Distance to the previous sample (0 for the first)
        increment_km: f64,
        /// Whether the increment advanced the distance total
        counted: bool,
    },
}

impl JourneyEngine {
    pub(crate) fn validate_start(&self, mode: &str) -> Result<TransportMode, EngineError> {
        if self.journey.status != JourneyStatus::NotStarted {
            return Err(EngineError::IllegalTransition {
                op: "start",
                status: self.journey.status,
            });
        }
        mode.parse().map_err(|_| EngineError::InvalidTransportMode(mode.to_string()))
    }

    /// `not_started -> active`: select a transport mode and begin tracking.
    ///
    /// Clears route, distance and elapsed time, and anchors the clock at
    /// `now_ms`.
    pub fn select_transport_and_start(
        &mut self,
        mode: &str,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let mode = self.validate_start(mode)?;

        self.route.clear();
        self.clock.start(now_ms);
        self.journey = Journey {
            status: JourneyStatus::Active,
            mode: Some(mode),
            started_at_ms: Some(now_ms),
            distance_km: 0.0,
            elapsed_seconds: 0,
            last_sample: None,
        };
        Ok(())
    }

    /// Feed one raw fix.
    ///
    /// A no-op outside `active` - the positioning source may keep emitting
    /// after a journey ends, and the engine must not react. A normalization
    /// failure surfaces `InvalidSample` without mutating the journey.
    pub fn ingest_fix(&mut self, raw: &RawFix, now_ms: u64) -> Result<FixOutcome, EngineError> {
        if self.journey.status != JourneyStatus::Active {
            return Ok(FixOutcome::Ignored);
        }

        let sample = GeoSample::from_raw(raw, self.speed_unit, now_ms)
            .map_err(EngineError::InvalidSample)?;

        let increment =
            distance::accumulate(self.journey.last_sample.as_ref(), &sample, self.noise_gate_km);
        if increment.counted {
            self.journey.distance_km += increment.increment_km;
        }
        // Below-gate jitter still lands in the route so the rendered path
        // matches the observed stream.
        self.route.append(&sample);
        self.journey.last_sample = Some(sample);

        Ok(FixOutcome::Recorded {
            increment_km: increment.increment_km,
            counted: increment.counted,
        })
    }

    /// Refresh elapsed seconds from the wall clock. No-op unless `active`.
    pub fn tick(&mut self, now_ms: u64) -> u64 {
        if self.journey.status == JourneyStatus::Active {
            self.journey.elapsed_seconds = self.clock.tick(now_ms);
        }
        self.journey.elapsed_seconds
    }

    /// `active -> finished`: freeze the timer and snapshot the journey.
    ///
    /// The returned record reflects the journey at this exact instant;
    /// nothing ingested afterwards can appear in it.
    pub fn end_journey(&mut self, now_ms: u64) -> Result<JourneyRecord, EngineError> {
        if self.journey.status != JourneyStatus::Active {
            return Err(EngineError::IllegalTransition { op: "end", status: self.journey.status });
        }
        let Some(mode) = self.journey.mode else {
            // Unreachable while the start op is the only way into `active`
            return Err(EngineError::IllegalTransition { op: "end", status: self.journey.status });
        };

        self.journey.elapsed_seconds = self.clock.tick(now_ms);
        self.clock.stop();
        self.journey.status = JourneyStatus::Finished;

        Ok(JourneyRecord::new(
            &self.user_id,
            mode,
            self.journey.distance_km,
            self.journey.elapsed_seconds,
            self.route.snapshot(),
            now_ms,
        ))
    }

    /// Zero everything and return to `not_started`.
    ///
    /// Legal from `finished` (normal reuse), `active` (abandon), and
    /// idempotently from `not_started`. Returns the prior status so the
    /// caller can release the position watch after an abandon.
    pub fn reset(&mut self) -> JourneyStatus {
        let prior = self.journey.status;
        self.journey = Journey::new();
        self.route.clear();
        self.clock.reset();
        prior
    }
}
