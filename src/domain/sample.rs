//! Positioning sample types and validation
//!
//! A `RawFix` is whatever the positioning source published; a `GeoSample` is
//! a fix that survived validation. Everything downstream of the normalizer
//! only ever sees `GeoSample`s.

use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Conversion factor for speed reported in meters/second.
pub const MPS_TO_KMH: f64 = 3.6;

/// Unit the positioning source reports speed in.
///
/// Browser-style geolocation APIs report m/s; some trackers publish km/h
/// directly. Configurable so a different source does not require a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    Mps,
    Kmh,
}

/// Raw positioning event as published on the fixes topic.
///
/// All fields are optional on the wire; the normalizer decides what is
/// fatal. A fix timestamp can be epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFix {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: TimestampValue,
}

/// Timestamp that can be either epoch milliseconds or an RFC 3339 string
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    EpochMs(u64),
    IsoString(String),
}

impl TimestampValue {
    /// Resolve to epoch milliseconds, if the value is present and parseable.
    pub fn to_epoch_ms(&self) -> Option<u64> {
        match self {
            TimestampValue::None => None,
            TimestampValue::EpochMs(ms) => Some(*ms),
            TimestampValue::IsoString(s) => OffsetDateTime::parse(s, &Rfc3339)
                .ok()
                .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(u64::try_from(value).map(TimestampValue::EpochMs).unwrap_or(TimestampValue::None))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            if value.is_finite() && value >= 0.0 {
                Ok(TimestampValue::EpochMs(value as u64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_none<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Why a raw fix was rejected by the normalizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleError {
    MissingCoordinates,
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::MissingCoordinates => write!(f, "missing latitude/longitude"),
            SampleError::LatitudeOutOfRange(lat) => write!(f, "latitude {lat} out of range"),
            SampleError::LongitudeOutOfRange(lon) => write!(f, "longitude {lon} out of range"),
        }
    }
}

impl std::error::Error for SampleError {}

/// A validated position + speed + time observation. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoSample {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub captured_at_ms: u64,
}

impl GeoSample {
    /// Normalize a raw fix into a validated sample.
    ///
    /// Rejects missing, non-finite, or out-of-range coordinates. A missing
    /// or negative speed maps to 0; m/s is converted to km/h when that is
    /// the source's reporting unit. A fix without a usable timestamp is
    /// stamped with `now_ms` (arrival time).
    pub fn from_raw(raw: &RawFix, unit: SpeedUnit, now_ms: u64) -> Result<Self, SampleError> {
        let (Some(latitude), Some(longitude)) = (raw.latitude, raw.longitude) else {
            return Err(SampleError::MissingCoordinates);
        };
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(SampleError::LatitudeOutOfRange(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(SampleError::LongitudeOutOfRange(longitude));
        }

        let reported = raw.speed.filter(|s| s.is_finite() && *s >= 0.0).unwrap_or(0.0);
        let speed_kmh = match unit {
            SpeedUnit::Mps => reported * MPS_TO_KMH,
            SpeedUnit::Kmh => reported,
        };

        Ok(GeoSample {
            latitude,
            longitude,
            speed_kmh,
            captured_at_ms: raw.timestamp.to_epoch_ms().unwrap_or(now_ms),
        })
    }
}

/// How the user is travelling. Closed set; anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Walking,
    Running,
    Cycling,
    Driving,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Walking => "walking",
            TransportMode::Running => "running",
            TransportMode::Cycling => "cycling",
            TransportMode::Driving => "driving",
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "walking" => Ok(TransportMode::Walking),
            "running" => Ok(TransportMode::Running),
            "cycling" => Ok(TransportMode::Cycling),
            "driving" => Ok(TransportMode::Driving),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
