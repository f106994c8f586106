use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use reqwest::header::CONTENT_TYPE;
use std::time::Instant;
use tracing::error;

use super::health::HEALTH;
use crate::database::metrics::ChannelMetrics;

pub struct GatewayMetrics {
    registry: Registry,
    pub request_counter: IntCounterVec,
    pub request_duration: HistogramVec,
    pub error_counter: IntCounterVec,
    pub channel_latency: HistogramVec,
    pub channel_error_rate: GaugeVec,
}

pub static METRICS: Lazy<GatewayMetrics> = Lazy::new(GatewayMetrics::new);

impl GatewayMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Total number of requests"),
            &["method", "endpoint", "status"],
        )
        .unwrap();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Request latency in seconds",
            ),
            &["method", "endpoint"],
        )
        .unwrap();

        let error_counter = IntCounterVec::new(
            Opts::new("gateway_errors_total", "Total number of errors"),
            &["type", "channel"],
        )
        .unwrap();

        let channel_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_channel_latency_seconds",
                "Channel response latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["channel", "model"],
        )
        .unwrap();

        let channel_error_rate = GaugeVec::new(
            Opts::new("gateway_channel_error_rate", "Channel error rate (0-1)"),
            &["channel"],
        )
        .unwrap();

        registry
            .register(Box::new(request_counter.clone()))
            .unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();
        registry.register(Box::new(error_counter.clone())).unwrap();
        registry
            .register(Box::new(channel_latency.clone()))
            .unwrap();
        registry
            .register(Box::new(channel_error_rate.clone()))
            .unwrap();

        Self {
            registry,
            request_counter,
            request_duration,
            error_counter,
            channel_latency,
            channel_error_rate,
        }
    }
}

/// Folds a forwarded-request outcome into the store, the Prometheus sink and
/// the passive health signal. Called by the forwarder on every outcome,
/// including caller disconnects and mid-stream failures.
pub fn record_outcome(
    channel_id: i64,
    channel_name: &str,
    model: &str,
    latency_seconds: f64,
    success: bool,
    err: Option<&str>,
) {
    if let Err(e) = ChannelMetrics::update(channel_id, latency_seconds, success) {
        error!(
            "failed to record metrics for channel {}: {:?}",
            channel_id, e
        );
    }

    METRICS
        .channel_latency
        .with_label_values(&[channel_name, model])
        .observe(latency_seconds);
    if !success {
        METRICS
            .error_counter
            .with_label_values(&["channel", channel_name])
            .inc();
    }
    if let Ok(Some(metrics)) = ChannelMetrics::get(channel_id) {
        METRICS
            .channel_error_rate
            .with_label_values(&[channel_name])
            .set(metrics.error_rate);
    }

    HEALTH.update_status(channel_id, success, err);
}

/// Counts every request and its wall-clock duration, labeled by route
/// template so path parameters do not explode the cardinality.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    METRICS
        .request_counter
        .with_label_values(&[&method, &endpoint, &status])
        .inc();
    METRICS
        .request_duration
        .with_label_values(&[&method, &endpoint])
        .observe(start.elapsed().as_secs_f64());

    response
}

pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = METRICS.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return Response::builder()
            .status(500)
            .body(Body::from("failed to encode metrics"))
            .unwrap();
    }

    Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap()
}
