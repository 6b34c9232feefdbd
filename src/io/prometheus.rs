//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::Metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Write a counter metric with a user label
fn write_counter(output: &mut String, name: &str, help: &str, user: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{user=\"{user}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, user: &str) -> String {
    let mut output = String::with_capacity(2048);

    write_counter(
        &mut output,
        "journey_events_total",
        "Total engine events processed",
        user,
        metrics.events_total(),
    );
    write_counter(
        &mut output,
        "journey_fixes_received_total",
        "Raw fixes received from the positioning source",
        user,
        metrics.fixes_received(),
    );
    write_counter(
        &mut output,
        "journey_fixes_accepted_total",
        "Fixes that advanced the distance total",
        user,
        metrics.fixes_accepted(),
    );
    write_counter(
        &mut output,
        "journey_fixes_below_gate_total",
        "Fixes recorded but below the noise gate",
        user,
        metrics.fixes_below_gate(),
    );
    write_counter(
        &mut output,
        "journey_fixes_rejected_total",
        "Fixes rejected by the normalizer",
        user,
        metrics.fixes_rejected(),
    );
    write_counter(
        &mut output,
        "journey_fixes_ignored_total",
        "Fixes ignored outside an active journey",
        user,
        metrics.fixes_ignored(),
    );
    write_counter(
        &mut output,
        "journey_source_errors_total",
        "Positioning source errors surfaced",
        user,
        metrics.source_errors(),
    );
    write_counter(
        &mut output,
        "journey_started_total",
        "Journeys started",
        user,
        metrics.journeys_started(),
    );
    write_counter(
        &mut output,
        "journey_completed_total",
        "Journeys completed",
        user,
        metrics.journeys_completed(),
    );
    write_counter(
        &mut output,
        "journey_abandoned_total",
        "Journeys abandoned via reset while active",
        user,
        metrics.journeys_abandoned(),
    );
    write_counter(
        &mut output,
        "journey_ingest_dropped_total",
        "Ingest events dropped on a full engine channel",
        user,
        metrics.ingest_dropped(),
    );
    write_counter(
        &mut output,
        "journey_feed_dropped_total",
        "Live feed messages dropped on a full channel",
        user,
        metrics.feed_dropped(),
    );

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    user: String,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &user);
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("not found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

/// Serve /metrics until shutdown.
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    user: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "metrics_server_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let user = user.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), user.clone())
                            });
                            if let Err(e) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                error!(error = %e, "metrics_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "metrics_accept_failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_exposition() {
        let metrics = Metrics::new();
        metrics.record_fix_received();
        metrics.record_fix_received();
        metrics.record_fix_accepted();
        metrics.record_journey_completed();

        let output = format_prometheus_metrics(&metrics, "user-1");

        assert!(output.contains("# TYPE journey_fixes_received_total counter"));
        assert!(output.contains("journey_fixes_received_total{user=\"user-1\"} 2"));
        assert!(output.contains("journey_fixes_accepted_total{user=\"user-1\"} 1"));
        assert!(output.contains("journey_completed_total{user=\"user-1\"} 1"));
    }
}
