//! Journey simulator - publishes a synthetic journey over MQTT
//!
//! Drives the engine end-to-end without a real positioning source: sends a
//! start command, a stream of fixes stepped along a bearing with small
//! deterministic jitter (plus optional out-of-range fixes), then an end
//! command.
//!
//! Usage:
//!   journey-sim --mode cycling --fixes 60 --interval-ms 1000

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Journey simulator - synthetic positioning source and control surface
#[derive(Parser, Debug)]
#[command(name = "journey-sim", version, about)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Topic for raw fixes
    #[arg(long, default_value = "journey/fixes")]
    fixes_topic: String,

    /// Topic for control commands
    #[arg(long, default_value = "journey/control")]
    control_topic: String,

    /// Transport mode to start with
    #[arg(long, default_value = "cycling")]
    mode: String,

    /// Number of fixes to publish
    #[arg(long, default_value_t = 60)]
    fixes: u32,

    /// Interval between fixes (ms)
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Start latitude
    #[arg(long, default_value_t = 52.2297)]
    latitude: f64,

    /// Start longitude
    #[arg(long, default_value_t = 21.0122)]
    longitude: f64,

    /// Ground speed in m/s
    #[arg(long, default_value_t = 5.0)]
    speed: f64,

    /// Publish an out-of-range fix every N fixes (0 disables)
    #[arg(long, default_value_t = 0)]
    bad_every: u32,

    /// Send a reset after the journey ends
    #[arg(long)]
    reset_after: bool,
}

/// Deterministic xorshift jitter source, so runs are reproducible
struct Jitter(u64);

impl Jitter {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    /// Next value in [-1.0, 1.0]
    fn next_unit(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x as f64 / u64::MAX as f64) * 2.0 - 1.0
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Meters per degree of latitude (good enough for a simulator)
const METERS_PER_DEGREE: f64 = 111_320.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();

    let client_id = format!("journey-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, &args.host, args.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);

    // Drive the MQTT eventloop in the background
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "sim_mqtt_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    info!(
        host = %args.host,
        port = %args.port,
        mode = %args.mode,
        fixes = %args.fixes,
        interval_ms = %args.interval_ms,
        "sim_starting"
    );

    // Start the journey
    let start = serde_json::json!({"command": "start", "mode": args.mode});
    client.publish(args.control_topic.as_str(), QoS::AtLeastOnce, false, start.to_string()).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Walk north-east from the starting point with some jitter
    let step_deg = args.speed * (args.interval_ms as f64 / 1000.0) / METERS_PER_DEGREE;
    let mut jitter = Jitter::new(0x6A09_E667_F3BC_C909);
    let mut latitude = args.latitude;
    let mut longitude = args.longitude;

    for i in 1..=args.fixes {
        if args.bad_every > 0 && i % args.bad_every == 0 {
            // Out-of-range latitude; the engine rejects it and keeps going
            let bad = serde_json::json!({
                "latitude": 200.0,
                "longitude": longitude,
                "speed": args.speed,
                "timestamp": epoch_ms(),
            });
            client.publish(args.fixes_topic.as_str(), QoS::AtMostOnce, false, bad.to_string()).await?;
        } else {
            latitude += step_deg * (0.7 + 0.05 * jitter.next_unit());
            longitude += step_deg * (0.7 + 0.05 * jitter.next_unit());

            let fix = serde_json::json!({
                "latitude": latitude,
                "longitude": longitude,
                "speed": args.speed * (1.0 + 0.1 * jitter.next_unit()),
                "timestamp": epoch_ms(),
            });
            client.publish(args.fixes_topic.as_str(), QoS::AtMostOnce, false, fix.to_string()).await?;
        }

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    // End the journey
    let end = serde_json::json!({"command": "end"});
    client.publish(args.control_topic.as_str(), QoS::AtLeastOnce, false, end.to_string()).await?;
    info!("sim_journey_ended");

    if args.reset_after {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let reset = serde_json::json!({"command": "reset"});
        client.publish(args.control_topic.as_str(), QoS::AtLeastOnce, false, reset.to_string()).await?;
        info!("sim_reset_sent");
    }

    // Let queued publishes flush before disconnecting
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();

    info!("sim_complete");
    Ok(())
}
