use axum::{
    extract::{Json, Path},
    routing::get,
    Router,
};
use serde::Deserialize;

use super::BaseError;
use crate::database::user::User;
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertPayload {
    pub api_key: String,
    pub name: Option<String>,
}

async fn list() -> Result<HttpResult<Vec<User>>, BaseError> {
    Ok(HttpResult::new(User::list()?))
}

async fn insert(Json(payload): Json<InsertPayload>) -> Result<HttpResult<User>, BaseError> {
    if payload.api_key.is_empty() {
        return Err(BaseError::ParamInvalid(Some(
            "api_key must not be empty".to_string(),
        )));
    }
    let user = User::new(&payload.api_key, payload.name.as_deref().unwrap_or(""));
    User::create(&user)?;
    Ok(HttpResult::new(user))
}

async fn get_user(Path(id): Path<i64>) -> Result<HttpResult<User>, BaseError> {
    let user = User::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("user {} not found", id))))?;
    Ok(HttpResult::new(user))
}

async fn delete_user(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    User::delete(id)?;
    Ok(HttpResult::new(()))
}

pub fn create_user_router() -> Router {
    Router::new()
        .route("/users", get(list).post(insert))
        .route("/users/{id}", get(get_user).delete(delete_user))
}
