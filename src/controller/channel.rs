use axum::{
    extract::{Json, Path},
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use super::BaseError;
use crate::database::channel::Channel;
use crate::database::metrics::ChannelMetrics;
use crate::service::health::{ChannelHealth, HEALTH};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertPayload {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub weight: Option<i32>,
    pub enabled: Option<bool>,
}

#[derive(Deserialize)]
struct UpdatePayload {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub weight: Option<i32>,
    pub enabled: Option<bool>,
}

async fn list() -> Result<HttpResult<Vec<Channel>>, BaseError> {
    Ok(HttpResult::new(Channel::list()?))
}

async fn insert(Json(payload): Json<InsertPayload>) -> Result<HttpResult<Channel>, BaseError> {
    let weight = match payload.weight {
        Some(weight) if weight > 0 => weight,
        _ => 10,
    };
    let channel = Channel::new(
        &payload.name,
        &payload.base_url,
        &payload.api_key,
        weight,
        payload.enabled.unwrap_or(true),
    );
    Channel::create(&channel)?;
    HEALTH.register_channel(channel.id);
    Ok(HttpResult::new(channel))
}

async fn get_channel(Path(id): Path<i64>) -> Result<HttpResult<Channel>, BaseError> {
    let channel = Channel::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("channel {} not found", id))))?;
    Ok(HttpResult::new(channel))
}

async fn update_channel(
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePayload>,
) -> Result<HttpResult<Channel>, BaseError> {
    let mut channel = Channel::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("channel {} not found", id))))?;

    if let Some(name) = payload.name {
        channel.name = name;
    }
    if let Some(base_url) = payload.base_url {
        channel.base_url = base_url;
    }
    if let Some(api_key) = payload.api_key {
        channel.api_key = api_key;
    }
    if let Some(weight) = payload.weight {
        if weight <= 0 {
            return Err(BaseError::ParamInvalid(Some(
                "weight must be positive".to_string(),
            )));
        }
        channel.weight = weight;
    }
    if let Some(enabled) = payload.enabled {
        channel.is_enabled = enabled;
    }

    Ok(HttpResult::new(Channel::update(&channel)?))
}

async fn delete_channel(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Channel::delete(id)?;
    HEALTH.unregister_channel(id);
    Ok(HttpResult::new(()))
}

async fn health_statuses() -> HttpResult<Vec<ChannelHealth>> {
    HttpResult::new(HEALTH.all())
}

async fn get_metrics(Path(id): Path<i64>) -> Result<HttpResult<Option<ChannelMetrics>>, BaseError> {
    Channel::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("channel {} not found", id))))?;
    Ok(HttpResult::new(ChannelMetrics::get(id)?))
}

async fn reset_metrics(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Channel::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("channel {} not found", id))))?;
    ChannelMetrics::reset(id)?;
    Ok(HttpResult::new(()))
}

pub fn create_channel_router() -> Router {
    Router::new()
        .route("/channels", get(list).post(insert))
        .route("/channels/health", get(health_statuses))
        .route(
            "/channels/{id}",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/channels/{id}/metrics", get(get_metrics))
        .route("/channels/{id}/metrics/reset", post(reset_metrics))
}
