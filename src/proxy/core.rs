use std::time::{Duration, Instant};

use axum::{body::Body, response::Response};
use futures::StreamExt;
use reqwest::{
    header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    StatusCode,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ProxyError;
use crate::service::metrics::record_outcome;
use crate::service::router::RouteResult;
use crate::utils::sse::SseLineBuffer;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Records a failure when the caller drops the response mid-stream: once
/// streaming headers are sent there is no other way to surface the outcome.
/// Disarmed on every path that reports the outcome itself.
struct DisconnectGuard {
    armed: bool,
    channel_id: i64,
    channel_name: String,
    model: String,
    start: Instant,
}

impl DisconnectGuard {
    fn new(channel_id: i64, channel_name: String, model: String, start: Instant) -> Self {
        Self {
            armed: true,
            channel_id,
            channel_name,
            model,
            start,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            let channel_id = self.channel_id;
            let channel_name = std::mem::take(&mut self.channel_name);
            let model = std::mem::take(&mut self.model);
            let elapsed = self.start.elapsed().as_secs_f64();
            tokio::spawn(async move {
                warn!(
                    "client disconnected while streaming from channel {}",
                    channel_name
                );
                record_outcome(
                    channel_id,
                    &channel_name,
                    &model,
                    elapsed,
                    false,
                    Some("client disconnected"),
                );
            });
        }
    }
}

/// Sends the rewritten request to the chosen channel and relays the response.
/// Every exit reports `(channel, duration, success)` to the aggregator.
pub(super) async fn forward_chat_request(
    route: RouteResult,
    logical_model: String,
    mut data: Value,
) -> Result<Response<Body>, ProxyError> {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("model".to_string(), json!(route.backend_model_name));
    }
    let is_stream = data.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let body = serde_json::to_string(&data)
        .map_err(|e| ProxyError::Internal(format!("failed to serialize request: {}", e)))?;
    let url = format!(
        "{}/chat/completions",
        route.channel.base_url.trim_end_matches('/')
    );
    let client = reqwest::Client::builder()
        .timeout(FORWARD_TIMEOUT)
        .build()
        .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {}", e)))?;

    debug!(
        "forwarding {} as {} to {}",
        logical_model, route.backend_model_name, url
    );

    let start = Instant::now();
    let response = match client
        .post(&url)
        .header(AUTHORIZATION, format!("Bearer {}", route.channel.api_key))
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("request to channel {} failed: {}", route.channel.name, e);
            record_outcome(
                route.channel.id,
                &route.channel.name,
                &logical_model,
                start.elapsed().as_secs_f64(),
                false,
                Some(&e.to_string()),
            );
            return Err(ProxyError::Network(e.to_string()));
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        let error_body = response.text().await.unwrap_or_default();
        error!(
            "channel {} returned status {}: {}",
            route.channel.name, status, error_body
        );
        record_outcome(
            route.channel.id,
            &route.channel.name,
            &logical_model,
            start.elapsed().as_secs_f64(),
            false,
            Some(&format!("backend status {}", status)),
        );
        return Err(ProxyError::Backend(error_body));
    }

    if is_stream {
        relay_stream(route, logical_model, start, response)
    } else {
        relay_unary(route, logical_model, start, response).await
    }
}

async fn relay_unary(
    route: RouteResult,
    logical_model: String,
    start: Instant,
    response: reqwest::Response,
) -> Result<Response<Body>, ProxyError> {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(
                "failed to read response body from channel {}: {}",
                route.channel.name, e
            );
            record_outcome(
                route.channel.id,
                &route.channel.name,
                &logical_model,
                start.elapsed().as_secs_f64(),
                false,
                Some(&e.to_string()),
            );
            return Err(ProxyError::Network(format!(
                "failed to read backend response: {}",
                e
            )));
        }
    };

    record_outcome(
        route.channel.id,
        &route.channel.name,
        &logical_model,
        start.elapsed().as_secs_f64(),
        true,
        None,
    );
    info!(
        "{}: request completed via channel {}",
        logical_model, route.channel.name
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .unwrap())
}

fn relay_stream(
    route: RouteResult,
    logical_model: String,
    start: Instant,
    response: reqwest::Response,
) -> Result<Response<Body>, ProxyError> {
    let (tx, mut rx) = mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(10);

    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    let channel_id = route.channel.id;
    let channel_name = route.channel.name;
    let mut guard = DisconnectGuard::new(
        channel_id,
        channel_name.clone(),
        logical_model.clone(),
        start,
    );

    let relayed = async_stream::stream! {
        let mut lines = SseLineBuffer::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(chunk) => {
                    for line in lines.push(&chunk) {
                        yield Ok::<_, std::io::Error>(line);
                    }
                }
                Err(e) => {
                    // Headers are already on the wire; the failure can only
                    // reach metrics and the log, the connection just drops.
                    guard.disarm();
                    error!("stream from channel {} failed: {}", channel_name, e);
                    record_outcome(
                        channel_id,
                        &channel_name,
                        &logical_model,
                        start.elapsed().as_secs_f64(),
                        false,
                        Some(&e.to_string()),
                    );
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                    return;
                }
            }
        }

        if let Some(rest) = lines.take_remaining() {
            yield Ok(rest);
        }

        guard.disarm();
        record_outcome(
            channel_id,
            &channel_name,
            &logical_model,
            start.elapsed().as_secs_f64(),
            true,
            None,
        );
        info!("{}: stream completed via channel {}", logical_model, channel_name);
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header(CONNECTION, "keep-alive")
        .body(Body::from_stream(relayed))
        .unwrap())
}
