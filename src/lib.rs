use axum::{middleware, routing::get, Json, Router};
use serde_json::json;

pub mod config;
pub mod controller;
pub mod database;
pub mod proxy;
pub mod service;
pub mod utils;

pub fn create_app() -> Router {
    Router::new()
        .nest("/v1", proxy::create_proxy_router())
        .nest("/api", controller::create_manager_router())
        .route(
            "/health",
            get(|| async { Json(json!({ "status": "ok" })) }),
        )
        .route("/metrics", get(service::metrics::metrics_handler))
        .layer(middleware::from_fn(service::metrics::track_requests))
        .fallback(controller::handle_404)
}
