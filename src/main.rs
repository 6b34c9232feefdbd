//! Journey tracking engine - turns a noisy stream of GPS fixes into a
//! validated route, a noise-gated distance total, and wall-clock elapsed
//! time, governed by an explicit journey state machine.
//!
//! Module structure:
//! - `domain/` - Core business types (Journey, GeoSample, records)
//! - `io/` - External interfaces (MQTT, persistence, live feed, metrics endpoint)
//! - `services/` - Tracking logic (engine, distance, route, elapsed time)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use journey_engine::infra::{Config, Metrics};
use journey_engine::io::{
    create_feed_channel, run_remote_sink, FeedPublisher, MqttPositionGateway, RecordStore,
    RemoteSink,
};
use journey_engine::services::JourneyEngine;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Journey tracking engine
#[derive(Parser, Debug)]
#[command(name = "journey-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(revision = %env!("BUILD_REVISION"), "journey-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker (if enabled) so sources can publish locally
    journey_engine::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        user = %config.user_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        fixes_topic = %config.mqtt_fixes_topic(),
        control_topic = %config.mqtt_control_topic(),
        noise_gate_km = %config.noise_gate_km(),
        tick_interval_ms = %config.tick_interval_ms(),
        record_file = %config.record_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Engine event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Position gateway: persistent control subscription, scoped fixes watch
    let (gateway, eventloop) = MqttPositionGateway::connect(&config);
    {
        let ingest_config = config.clone();
        let ingest_gateway = gateway.clone();
        let ingest_metrics = metrics.clone();
        let ingest_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = journey_engine::io::position::run_ingest(
                &ingest_config,
                ingest_gateway,
                eventloop,
                event_tx,
                ingest_metrics,
                ingest_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "ingest error");
            }
        });
    }

    // Live feed publisher (if enabled)
    let feed = if config.feed_enabled() {
        let (feed_sender, feed_rx) = create_feed_channel(1000, metrics.clone());
        let publisher = FeedPublisher::new(&config, feed_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        Some(feed_sender)
    } else {
        None
    };

    // Remote persistence sink (if a remote URL is configured)
    let remote_tx = match RemoteSink::from_config(&config) {
        Some(sink) => {
            let (record_tx, record_rx) = mpsc::channel(100);
            let sink_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                run_remote_sink(sink, record_rx, sink_shutdown).await;
            });
            Some(record_tx)
        }
        None => None,
    };

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_user = config.user_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = journey_engine::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_user,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary in the logs
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Record store + engine (main event processing loop)
    let record_store = RecordStore::new(config.record_file());
    let mut engine =
        JourneyEngine::new(&config, gateway, record_store, remote_tx, feed, metrics);

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run engine - consumes events until shutdown or channel close
    engine.run(event_rx, shutdown_rx).await;

    info!("journey-engine shutdown complete");
    Ok(())
}
