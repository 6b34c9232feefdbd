//! Great-circle distance and noise-gated accumulation
//!
//! Distance between consecutive samples is computed with the haversine
//! formula on a spherical Earth. Increments at or below the noise gate are
//! treated as GPS jitter: they do not advance the running total, but the
//! sample is still recorded in the route so the rendered path matches what
//! was observed.

use crate::domain::sample::GeoSample;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default minimum increment (1 meter) that counts toward distance
pub const DEFAULT_NOISE_GATE_KM: f64 = 0.001;

/// Great-circle distance in kilometers between two coordinates.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Outcome of evaluating one sample against the previous one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Increment {
    /// Raw distance to the previous sample (0 for the first sample)
    pub increment_km: f64,
    /// Whether the increment counts toward the running total
    pub counted: bool,
}

/// Evaluate the distance increment for `next`.
///
/// The first sample of a journey is always counted, with a zero increment.
/// Later samples count only when strictly above `gate_km`.
pub fn accumulate(prev: Option<&GeoSample>, next: &GeoSample, gate_km: f64) -> Increment {
    match prev {
        None => Increment { increment_km: 0.0, counted: true },
        Some(prev) => {
            let increment_km =
                haversine_km(prev.latitude, prev.longitude, next.latitude, next.longitude);
            Increment { increment_km, counted: increment_km > gate_km }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lon: f64) -> GeoSample {
        GeoSample { latitude: lat, longitude: lon, speed_kmh: 0.0, captured_at_ms: 0 }
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert_eq!(haversine_km(52.2297, 21.0122, 52.2297, 21.0122), 0.0);
    }

    #[test]
    fn test_haversine_warsaw_short_hop() {
        // Two points in Warsaw roughly 40 m apart
        let d = haversine_km(52.2297, 21.0122, 52.2300, 21.0130);
        assert!((d - 0.04).abs() < 0.005, "expected ~0.04 km, got {d}");
    }

    #[test]
    fn test_haversine_warsaw_berlin() {
        // Warsaw -> Berlin is roughly 517 km
        let d = haversine_km(52.2297, 21.0122, 52.5200, 13.4050);
        assert!((d - 517.0).abs() < 5.0, "expected ~517 km, got {d}");
    }

    #[test]
    fn test_haversine_symmetric() {
        let ab = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        let ba = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_first_sample_counted_with_zero_increment() {
        let inc = accumulate(None, &sample(52.0, 21.0), DEFAULT_NOISE_GATE_KM);
        assert_eq!(inc, Increment { increment_km: 0.0, counted: true });
    }

    #[test]
    fn test_gate_is_strictly_greater_than() {
        let prev = sample(52.0, 21.0);
        let next = sample(52.00001, 21.0);
        let d = haversine_km(prev.latitude, prev.longitude, next.latitude, next.longitude);

        // Gate equal to the increment: must not count (strict >)
        let inc = accumulate(Some(&prev), &next, d);
        assert!(!inc.counted, "an increment equal to the gate must not count");

        // Gate just below the increment (0.0011 vs 0.001 proportions): counts
        let inc = accumulate(Some(&prev), &next, d / 1.1);
        assert!(inc.counted, "an increment above the gate must count");
    }

    #[test]
    fn test_jitter_below_gate_not_counted() {
        let prev = sample(52.2297, 21.0122);
        let next = sample(52.229_700_5, 21.012_200_5);
        let inc = accumulate(Some(&prev), &next, DEFAULT_NOISE_GATE_KM);
        assert!(inc.increment_km < DEFAULT_NOISE_GATE_KM);
        assert!(!inc.counted);
    }
}
