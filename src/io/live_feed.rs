//! Live feed for rendering collaborators
//!
//! The engine publishes read-only snapshots of the in-flight journey
//! (position, distance, elapsed) plus completed-journey summaries and
//! non-blocking alerts. Consumers (a map UI, a dashboard) subscribe to the
//! MQTT topics; nothing here can mutate engine state.
//!
//! A bounded typed channel decouples the engine loop from the publisher:
//! sends never block, overflow is counted and dropped.

use crate::domain::journey::JourneyRecord;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Messages that can be sent to the feed publisher
#[derive(Debug)]
pub enum FeedMessage {
    /// Snapshot of the in-flight journey (QoS 0)
    Status(StatusPayload),
    /// Completed journey summary (QoS 1)
    Journey(JourneyRecord),
    /// Non-blocking alert, e.g. a rejected fix (QoS 0)
    Alert(AlertPayload),
}

/// Read-only snapshot of the in-flight journey
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub user: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Journey lifecycle state (not_started, active, finished)
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    /// `elapsed_seconds` formatted as `HH:MM:SS`
    pub elapsed_hms: String,
    /// Number of points currently in the route buffer
    pub route_points: usize,
}

/// Non-blocking alert surfaced to the UI
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub user: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Error kind (invalid_sample, illegal_transition, ...)
    pub kind: String,
    pub message: String,
}

/// Non-blocking sender half of the feed channel
#[derive(Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedMessage>,
    metrics: Arc<Metrics>,
}

impl FeedSender {
    fn send(&self, message: FeedMessage) {
        if self.tx.try_send(message).is_err() {
            self.metrics.record_feed_dropped();
            debug!("feed_message_dropped");
        }
    }

    pub fn send_status(&self, payload: StatusPayload) {
        self.send(FeedMessage::Status(payload));
    }

    pub fn send_journey(&self, record: JourneyRecord) {
        self.send(FeedMessage::Journey(record));
    }

    pub fn send_alert(&self, payload: AlertPayload) {
        self.send(FeedMessage::Alert(payload));
    }
}

/// Create the feed channel pair
pub fn create_feed_channel(
    capacity: usize,
    metrics: Arc<Metrics>,
) -> (FeedSender, mpsc::Receiver<FeedMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (FeedSender { tx, metrics }, rx)
}

/// MQTT publisher actor for the live feed
///
/// Receives messages from the feed channel and publishes them to the
/// configured topics.
pub struct FeedPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<FeedMessage>,
    status_topic: String,
    journeys_topic: String,
    alerts_topic: String,
}

impl FeedPublisher {
    /// Create a new publisher connected to the configured broker.
    pub fn new(config: &Config, rx: mpsc::Receiver<FeedMessage>) -> Self {
        let client_id = format!("journey-feed-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("feed_publisher_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "feed_publisher_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            status_topic: config.feed_status_topic().to_string(),
            journeys_topic: config.feed_journeys_topic().to_string(),
            alerts_topic: config.feed_alerts_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            status = %self.status_topic,
            journeys = %self.journeys_topic,
            alerts = %self.alerts_topic,
            "feed_publisher_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("feed_publisher_shutdown");
                        return;
                    }
                }
                message = self.rx.recv() => {
                    match message {
                        Some(m) => self.publish(m).await,
                        None => {
                            info!("feed_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn publish(&self, message: FeedMessage) {
        let (topic, qos, payload) = match &message {
            FeedMessage::Status(p) => (&self.status_topic, QoS::AtMostOnce, serde_json::to_string(p)),
            FeedMessage::Journey(r) => {
                (&self.journeys_topic, QoS::AtLeastOnce, serde_json::to_string(r))
            }
            FeedMessage::Alert(p) => (&self.alerts_topic, QoS::AtMostOnce, serde_json::to_string(p)),
        };

        let payload = match payload {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "feed_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.client.publish(topic.as_str(), qos, false, payload).await {
            warn!(topic = %topic, error = %e, "feed_publish_failed");
        } else {
            debug!(topic = %topic, "feed_published");
        }
    }
}
