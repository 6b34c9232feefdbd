//! MQTT position gateway
//!
//! Bridges the positioning collaborator into the engine. Two topics:
//! - *fixes* - raw position fixes (or `{"error":{"message":...}}` on the
//!   source's error channel). Subscribed only while a journey is active:
//!   the engine acquires the watch on `active` entry and releases it on
//!   every exit path, via the [`PositionSource`] trait.
//! - *control* - start/end/reset commands. Subscribed for the lifetime of
//!   the process.
//!
//! Events are forwarded with `try_send` so a slow engine never blocks the
//! MQTT eventloop; drops are counted in metrics.

use crate::domain::sample::RawFix;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::engine::{Command, EngineEvent};
use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// The positioning collaborator as the engine sees it.
///
/// `begin_watch` is called when a journey enters `active`; `end_watch`
/// exactly once on every path that leaves `active`. A failed `begin_watch`
/// means the journey cannot start (`PositioningUnavailable`).
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn begin_watch(&self) -> anyhow::Result<()>;
    async fn end_watch(&self);
}

/// MQTT-backed position source
pub struct MqttPositionGateway {
    client: AsyncClient,
    fixes_topic: String,
}

impl MqttPositionGateway {
    /// Connect to the configured broker.
    ///
    /// Returns the gateway plus the eventloop that `run_ingest` must drive.
    pub fn connect(config: &Config) -> (Arc<Self>, EventLoop) {
        let mut mqttoptions =
            MqttOptions::new("journey-engine", config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);
        let gateway =
            Arc::new(Self { client, fixes_topic: config.mqtt_fixes_topic().to_string() });
        (gateway, eventloop)
    }
}

#[async_trait]
impl PositionSource for MqttPositionGateway {
    async fn begin_watch(&self) -> anyhow::Result<()> {
        self.client
            .subscribe(self.fixes_topic.as_str(), QoS::AtMostOnce)
            .await
            .context("subscribe to fixes topic")?;
        info!(topic = %self.fixes_topic, "position_watch_started");
        Ok(())
    }

    async fn end_watch(&self) {
        match self.client.unsubscribe(self.fixes_topic.as_str()).await {
            Ok(()) => info!(topic = %self.fixes_topic, "position_watch_stopped"),
            Err(e) => warn!(error = %e, "position_watch_stop_failed"),
        }
    }
}

/// Drive the MQTT eventloop, forwarding fixes and control commands to the
/// engine channel.
pub async fn run_ingest(
    config: &Config,
    gateway: Arc<MqttPositionGateway>,
    mut eventloop: EventLoop,
    event_tx: mpsc::Sender<EngineEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    gateway.client.subscribe(config.mqtt_control_topic(), QoS::AtLeastOnce).await?;

    info!(
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        control = %config.mqtt_control_topic(),
        fixes = %config.mqtt_fixes_topic(),
        "ingest_started"
    );

    let fixes_topic = config.mqtt_fixes_topic().to_string();
    let control_topic = config.mqtt_control_topic().to_string();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingest_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = match std::str::from_utf8(&publish.payload) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "invalid_utf8_payload");
                                continue;
                            }
                        };

                        let event = if publish.topic == fixes_topic {
                            parse_fix_message(payload)
                        } else if publish.topic == control_topic {
                            parse_control_message(payload).map(EngineEvent::Command)
                        } else {
                            None
                        };

                        let Some(event) = event else { continue };
                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_ingest_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("engine_event_dropped: channel full");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("engine_event_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceErrorEnvelope {
    error: SourceErrorBody,
}

#[derive(Debug, Deserialize)]
struct SourceErrorBody {
    message: String,
}

/// Parse a fixes-topic payload into an engine event.
///
/// The source's error channel shares the topic as `{"error":{"message"}}`;
/// checked first because a raw fix tolerates unknown fields.
pub fn parse_fix_message(payload: &str) -> Option<EngineEvent> {
    if let Ok(envelope) = serde_json::from_str::<SourceErrorEnvelope>(payload) {
        return Some(EngineEvent::SourceError(envelope.error.message));
    }

    match serde_json::from_str::<RawFix>(payload) {
        Ok(fix) => Some(EngineEvent::Fix(fix)),
        Err(e) => {
            debug!(error = %e, "unparseable_fix_payload");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    command: String,
    #[serde(default)]
    mode: Option<String>,
}

/// Parse a control-topic payload into a command.
pub fn parse_control_message(payload: &str) -> Option<Command> {
    let message: ControlMessage = match serde_json::from_str(payload) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "unparseable_control_payload");
            return None;
        }
    };

    match message.command.as_str() {
        "start" => Some(Command::Start { mode: message.mode.unwrap_or_default() }),
        "end" => Some(Command::End),
        "reset" => Some(Command::Reset),
        other => {
            debug!(command = %other, "unknown_control_command");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::TimestampValue;

    #[test]
    fn test_parse_fix() {
        let event = parse_fix_message(
            r#"{"latitude": 52.2297, "longitude": 21.0122, "speed": 2.5, "timestamp": 1736012345678}"#,
        );
        match event {
            Some(EngineEvent::Fix(fix)) => {
                assert_eq!(fix.latitude, Some(52.2297));
                assert_eq!(fix.longitude, Some(21.0122));
                assert_eq!(fix.speed, Some(2.5));
                assert_eq!(fix.timestamp, TimestampValue::EpochMs(1736012345678));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_fix_with_null_speed() {
        let event = parse_fix_message(r#"{"latitude": 1.0, "longitude": 2.0, "speed": null}"#);
        match event {
            Some(EngineEvent::Fix(fix)) => assert_eq!(fix.speed, None),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_source_error() {
        let event = parse_fix_message(r#"{"error": {"message": "permission denied"}}"#);
        match event {
            Some(EngineEvent::SourceError(message)) => assert_eq!(message, "permission denied"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_fix_garbage() {
        assert!(parse_fix_message("not json").is_none());
        assert!(parse_fix_message("[1, 2]").is_none());
    }

    #[test]
    fn test_parse_fix_empty_object_is_a_fix() {
        // Missing coordinates are a normalizer concern, not a parse error
        match parse_fix_message("{}") {
            Some(EngineEvent::Fix(fix)) => {
                assert_eq!(fix.latitude, None);
                assert_eq!(fix.longitude, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_control_start() {
        assert_eq!(
            parse_control_message(r#"{"command": "start", "mode": "cycling"}"#),
            Some(Command::Start { mode: "cycling".to_string() })
        );
        // Missing mode is surfaced to the engine as an empty mode, which it
        // rejects as InvalidTransportMode
        assert_eq!(
            parse_control_message(r#"{"command": "start"}"#),
            Some(Command::Start { mode: String::new() })
        );
    }

    #[test]
    fn test_parse_control_end_reset() {
        assert_eq!(parse_control_message(r#"{"command": "end"}"#), Some(Command::End));
        assert_eq!(parse_control_message(r#"{"command": "reset"}"#), Some(Command::Reset));
    }

    #[test]
    fn test_parse_control_unknown() {
        assert!(parse_control_message(r#"{"command": "pause"}"#).is_none());
        assert!(parse_control_message("garbage").is_none());
    }
}
