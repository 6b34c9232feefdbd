//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `position` - MQTT gateway for the positioning source and control topic
//! - `live_feed` - Typed channel + MQTT publisher for rendering collaborators
//! - `record_store` - Journey record output to file (JSONL format)
//! - `remote_sink` - Fire-and-forget HTTP delivery of journey records
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod live_feed;
pub mod position;
pub mod prometheus;
pub mod record_store;
pub mod remote_sink;

// Re-export commonly used types
pub use live_feed::{create_feed_channel, AlertPayload, FeedPublisher, FeedSender, StatusPayload};
pub use position::{MqttPositionGateway, PositionSource};
pub use record_store::RecordStore;
pub use remote_sink::{run_remote_sink, RemoteSink};
