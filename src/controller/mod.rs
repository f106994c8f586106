use axum::{http, response::IntoResponse, Router};

use channel::create_channel_router;
use model::create_model_router;
use session::create_session_router;
use user::create_user_router;

mod channel;
mod error;
mod model;
mod session;
mod user;

pub use error::BaseError;

pub fn create_manager_router() -> Router {
    Router::new()
        .merge(create_channel_router())
        .merge(create_user_router())
        .merge(create_model_router())
        .merge(create_session_router())
}

pub async fn handle_404() -> impl IntoResponse {
    (http::StatusCode::NOT_FOUND, "not found")
}
