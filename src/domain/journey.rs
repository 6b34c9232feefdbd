//! Journey aggregate and completed-journey records

use crate::domain::sample::{GeoSample, TransportMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Format whole seconds as zero-padded `HH:MM:SS`
pub fn format_hms(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Journey lifecycle state
///
/// The only legal transitions are
/// `NotStarted -> Active -> Finished -> NotStarted` (via reset), plus
/// `Active -> NotStarted` when a journey is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    NotStarted,
    Active,
    Finished,
}

impl JourneyStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::NotStarted => "not_started",
            JourneyStatus::Active => "active",
            JourneyStatus::Finished => "finished",
        }
    }
}

/// The single in-flight tracking session.
///
/// Owned exclusively by the engine; every field is mutated only through the
/// engine's state-machine operations. The route itself lives in the engine's
/// route buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Journey {
    pub status: JourneyStatus,
    pub mode: Option<TransportMode>,
    pub started_at_ms: Option<u64>,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub last_sample: Option<GeoSample>,
}

impl Journey {
    /// A zeroed, not-yet-started journey.
    pub fn new() -> Self {
        Self {
            status: JourneyStatus::NotStarted,
            mode: None,
            started_at_ms: None,
            distance_km: 0.0,
            elapsed_seconds: 0,
            last_sample: None,
        }
    }
}

impl Default for Journey {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of a completed journey, handed to persistence.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyRecord {
    /// UUIDv7 record id
    pub id: String,
    /// User the journey belongs to
    pub user: String,
    pub mode: TransportMode,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    /// `elapsed_seconds` formatted as `HH:MM:SS`
    pub elapsed_hms: String,
    pub completed_at: DateTime<Utc>,
    /// Ordered `[latitude, longitude]` pairs of every recorded sample
    pub route: Vec<[f64; 2]>,
}

impl JourneyRecord {
    pub fn new(
        user: &str,
        mode: TransportMode,
        distance_km: f64,
        elapsed_seconds: u64,
        route: Vec<[f64; 2]>,
        completed_at_ms: u64,
    ) -> Self {
        Self {
            id: new_uuid_v7(),
            user: user.to_string(),
            mode,
            distance_km,
            elapsed_seconds,
            elapsed_hms: format_hms(elapsed_seconds),
            completed_at: DateTime::from_timestamp_millis(completed_at_ms as i64)
                .unwrap_or_else(Utc::now),
            route,
        }
    }
}
