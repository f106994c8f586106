use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::service::router::RouteError;

mod auth;
mod core;
mod handlers;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("backend request failed: {0}")]
    Network(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Route(RouteError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Route(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Backend(_) | ProxyError::Network(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_proxy_router() -> Router {
    Router::new()
        .route(
            "/chat/completions",
            post(handlers::chat_completions).layer(middleware::from_fn(auth::require_api_key)),
        )
        .route("/models", get(handlers::list_models))
}
