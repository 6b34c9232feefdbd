//! Append-only route buffer for path reconstruction
//!
//! Every sample that passes the normalizer is recorded here, including
//! sub-noise-gate jitter, so a rendered path matches the observed stream.
//! Consumers only ever get an owned snapshot; the internal buffer is never
//! exposed.

use crate::domain::sample::GeoSample;

/// Ordered `[latitude, longitude]` pairs for the current journey
#[derive(Debug, Default)]
pub struct RouteBuffer {
    points: Vec<[f64; 2]>,
}

impl RouteBuffer {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Record a sample's coordinates. O(1) amortized.
    pub fn append(&mut self, sample: &GeoSample) {
        self.points.push([sample.latitude, sample.longitude]);
    }

    /// Owned copy of the full route, oldest first.
    pub fn snapshot(&self) -> Vec<[f64; 2]> {
        self.points.clone()
    }

    /// Drop all points. Used only by reset.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
