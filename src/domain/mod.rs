//! Domain models - core business types for journey tracking
//!
//! This module contains the canonical data types used throughout the system:
//! - `Journey` - the single in-flight tracking session and its lifecycle state
//! - `JourneyRecord` - the immutable snapshot emitted when a journey completes
//! - `RawFix` - a raw positioning event as it arrives off the wire
//! - `GeoSample` - a validated position + speed + time observation
//! - `TransportMode` - how the user is travelling

pub mod journey;
pub mod sample;
