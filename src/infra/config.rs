//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::sample::SpeedUnit;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// User the engine tracks for; scopes every persisted record
    #[serde(default = "default_user_id")]
    pub id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self { id: default_user_id() }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic the positioning source publishes raw fixes on
    #[serde(default = "default_fixes_topic")]
    pub fixes_topic: String,
    /// Topic carrying start/end/reset commands
    #[serde(default = "default_control_topic")]
    pub control_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            fixes_topic: default_fixes_topic(),
            control_topic: default_control_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_fixes_topic() -> String {
    "journey/fixes".to_string()
}

fn default_control_topic() -> String {
    "journey/control".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Minimum distance increment (km) that counts toward the total.
    /// Below this a fix is treated as GPS jitter.
    #[serde(default = "default_noise_gate_km")]
    pub noise_gate_km: f64,
    /// Unit the positioning source reports speed in
    #[serde(default = "default_speed_unit")]
    pub speed_unit: SpeedUnit,
    /// Cadence of the elapsed-time tick while a journey is active
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            noise_gate_km: default_noise_gate_km(),
            speed_unit: default_speed_unit(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_noise_gate_km() -> f64 {
    0.001
}

fn default_speed_unit() -> SpeedUnit {
    SpeedUnit::Mps
}

fn default_tick_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// File path for journey records (JSONL format)
    #[serde(default = "default_record_file")]
    pub file: String,
    /// Optional HTTP endpoint to POST each record to
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Bearer token for the remote endpoint
    #[serde(default)]
    pub remote_token: Option<String>,
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            file: default_record_file(),
            remote_url: None,
            remote_token: None,
            remote_timeout_ms: default_remote_timeout_ms(),
        }
    }
}

fn default_record_file() -> String {
    "journeys.jsonl".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveFeedConfig {
    #[serde(default = "default_feed_enabled")]
    pub enabled: bool,
    /// Topic for live journey status snapshots (QoS 0)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Topic for completed journey summaries (QoS 1)
    #[serde(default = "default_journeys_topic")]
    pub journeys_topic: String,
    /// Topic for non-blocking alerts (QoS 0)
    #[serde(default = "default_alerts_topic")]
    pub alerts_topic: String,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            enabled: default_feed_enabled(),
            status_topic: default_status_topic(),
            journeys_topic: default_journeys_topic(),
            alerts_topic: default_alerts_topic(),
        }
    }
}

fn default_feed_enabled() -> bool {
    true
}

fn default_status_topic() -> String {
    "journey/status".to_string()
}

fn default_journeys_topic() -> String {
    "journey/completed".to_string()
}

fn default_alerts_topic() -> String {
    "journey/alerts".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Interval for logging a metrics summary (seconds)
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run the embedded MQTT broker (disable when an external broker exists)
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub live_feed: LiveFeedConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    user_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_fixes_topic: String,
    mqtt_control_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    noise_gate_km: f64,
    speed_unit: SpeedUnit,
    tick_interval_ms: u64,
    record_file: String,
    remote_url: Option<String>,
    remote_token: Option<String>,
    remote_timeout_ms: u64,
    feed_enabled: bool,
    feed_status_topic: String,
    feed_journeys_topic: String,
    feed_alerts_topic: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            user_id: toml_config.user.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_fixes_topic: toml_config.mqtt.fixes_topic,
            mqtt_control_topic: toml_config.mqtt.control_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            noise_gate_km: toml_config.tracking.noise_gate_km,
            speed_unit: toml_config.tracking.speed_unit,
            tick_interval_ms: toml_config.tracking.tick_interval_ms,
            record_file: toml_config.persistence.file,
            remote_url: toml_config.persistence.remote_url,
            remote_token: toml_config.persistence.remote_token,
            remote_timeout_ms: toml_config.persistence.remote_timeout_ms,
            feed_enabled: toml_config.live_feed.enabled,
            feed_status_topic: toml_config.live_feed.status_topic,
            feed_journeys_topic: toml_config.live_feed.journeys_topic,
            feed_alerts_topic: toml_config.live_feed.alerts_topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load from a path, falling back to defaults when the file is missing
    /// or malformed.
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path, error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_fixes_topic(&self) -> &str {
        &self.mqtt_fixes_topic
    }

    pub fn mqtt_control_topic(&self) -> &str {
        &self.mqtt_control_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn noise_gate_km(&self) -> f64 {
        self.noise_gate_km
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        self.speed_unit
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn record_file(&self) -> &str {
        &self.record_file
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn remote_token(&self) -> Option<&str> {
        self.remote_token.as_deref()
    }

    pub fn remote_timeout_ms(&self) -> u64 {
        self.remote_timeout_ms
    }

    pub fn feed_enabled(&self) -> bool {
        self.feed_enabled
    }

    pub fn feed_status_topic(&self) -> &str {
        &self.feed_status_topic
    }

    pub fn feed_journeys_topic(&self) -> &str {
        &self.feed_journeys_topic
    }

    pub fn feed_alerts_topic(&self) -> &str {
        &self.feed_alerts_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.user_id(), "local");
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_fixes_topic(), "journey/fixes");
        assert_eq!(config.mqtt_control_topic(), "journey/control");
        assert_eq!(config.noise_gate_km(), 0.001);
        assert_eq!(config.speed_unit(), SpeedUnit::Mps);
        assert_eq!(config.tick_interval_ms(), 1000);
        assert_eq!(config.record_file(), "journeys.jsonl");
        assert!(config.remote_url().is_none());
        assert!(config.feed_enabled());
        assert_eq!(config.prometheus_port(), 9090);
        assert!(config.broker_enabled());
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty");
        assert_eq!(config.user_id(), "local");
        assert_eq!(config.noise_gate_km(), 0.001);
    }

    #[test]
    fn test_resolve_config_path_from_args() {
        let args = vec!["prog".to_string(), "--config".to_string(), "custom.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "custom.toml");

        let args = vec!["prog".to_string(), "--config=inline.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "inline.toml");
    }

    #[test]
    fn test_speed_unit_parsing() {
        let toml_config: TomlConfig =
            toml::from_str("[tracking]\nspeed_unit = \"kmh\"").unwrap();
        assert_eq!(toml_config.tracking.speed_unit, SpeedUnit::Kmh);

        assert!(toml::from_str::<TomlConfig>("[tracking]\nspeed_unit = \"knots\"").is_err());
    }
}
