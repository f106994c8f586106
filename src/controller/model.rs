use axum::{
    extract::{Json, Path},
    routing::{delete, get},
    Router,
};
use serde::Deserialize;

use super::BaseError;
use crate::database::channel::Channel;
use crate::database::model::Model;
use crate::database::model_channel::ModelChannel;
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct ModelPayload {
    pub name: String,
}

#[derive(Deserialize)]
struct BindingPayload {
    pub channel_id: i64,
    pub backend_model_name: String,
    pub weight: Option<i32>,
}

async fn list() -> Result<HttpResult<Vec<Model>>, BaseError> {
    Ok(HttpResult::new(Model::list()?))
}

async fn insert(Json(payload): Json<ModelPayload>) -> Result<HttpResult<Model>, BaseError> {
    if payload.name.is_empty() {
        return Err(BaseError::ParamInvalid(Some(
            "name must not be empty".to_string(),
        )));
    }
    Ok(HttpResult::new(Model::create(&payload.name)?))
}

async fn get_model(Path(id): Path<i64>) -> Result<HttpResult<Model>, BaseError> {
    let model = Model::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("model {} not found", id))))?;
    Ok(HttpResult::new(model))
}

async fn update_model(
    Path(id): Path<i64>,
    Json(payload): Json<ModelPayload>,
) -> Result<HttpResult<Model>, BaseError> {
    Model::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("model {} not found", id))))?;
    Ok(HttpResult::new(Model::rename(id, &payload.name)?))
}

async fn delete_model(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Model::delete(id)?;
    Ok(HttpResult::new(()))
}

async fn list_bindings(Path(id): Path<i64>) -> Result<HttpResult<Vec<ModelChannel>>, BaseError> {
    Model::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("model {} not found", id))))?;
    Ok(HttpResult::new(ModelChannel::list_by_model(id)?))
}

async fn add_binding(
    Path(id): Path<i64>,
    Json(payload): Json<BindingPayload>,
) -> Result<HttpResult<ModelChannel>, BaseError> {
    Model::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("model {} not found", id))))?;
    Channel::get_by_id(payload.channel_id)?.ok_or_else(|| {
        BaseError::NotFound(Some(format!("channel {} not found", payload.channel_id)))
    })?;

    let binding = ModelChannel::add(
        id,
        payload.channel_id,
        &payload.backend_model_name,
        payload.weight.unwrap_or(0),
    )?;
    Ok(HttpResult::new(binding))
}

async fn remove_binding(
    Path((id, channel_id)): Path<(i64, i64)>,
) -> Result<HttpResult<()>, BaseError> {
    ModelChannel::remove(id, channel_id)?;
    Ok(HttpResult::new(()))
}

pub fn create_model_router() -> Router {
    Router::new()
        .route("/models", get(list).post(insert))
        .route(
            "/models/{id}",
            get(get_model).put(update_model).delete(delete_model),
        )
        .route("/models/{id}/channels", get(list_bindings).post(add_binding))
        .route(
            "/models/{id}/channels/{channel_id}",
            delete(remove_binding),
        )
}
