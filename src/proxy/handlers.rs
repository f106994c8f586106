use axum::{
    body::Body,
    extract::Request,
    response::Response,
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::auth::AuthedUser;
use super::core::forward_chat_request;
use super::ProxyError;
use crate::database::model::Model;
use crate::service::router;

pub async fn chat_completions(
    Extension(user): Extension<AuthedUser>,
    request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let data = parse_request_body(request).await?;

    let model_name = data
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::InvalidRequest("'model' field must be a string".to_string()))?
        .to_string();

    let route = router::route(user.0, &model_name).map_err(|e| {
        warn!("routing failed for model '{}': {}", model_name, e);
        ProxyError::from(e)
    })?;
    info!(
        "routing {} to channel {} (session {}, new: {})",
        model_name, route.channel.name, route.session_id, route.is_new
    );

    forward_chat_request(route, model_name, data).await
}

/// Reads the body whole; requests are routed on the raw JSON value so every
/// field the caller sent reaches the backend untouched.
async fn parse_request_body(request: Request<Body>) -> Result<Value, ProxyError> {
    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {}", e)))?;
    let data: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid JSON body: {}", e)))?;
    if !data.is_object() {
        return Err(ProxyError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    }
    Ok(data)
}

#[derive(Serialize)]
struct ModelInfo {
    id: String,
    object: String,
    created: i64,
    owned_by: String,
}

#[derive(Serialize)]
pub(crate) struct ModelListResponse {
    object: String,
    data: Vec<ModelInfo>,
}

pub async fn list_models() -> Result<Json<ModelListResponse>, ProxyError> {
    let models = Model::list().map_err(|e| ProxyError::Internal(format!("{:?}", e)))?;

    let data = models
        .into_iter()
        .map(|m| ModelInfo {
            id: m.name,
            object: "model".to_string(),
            created: m.created_at / 1000,
            owned_by: "modelgate".to_string(),
        })
        .collect();

    Ok(Json(ModelListResponse {
        object: "list".to_string(),
        data,
    }))
}
