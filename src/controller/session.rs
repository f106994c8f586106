use axum::{
    extract::Path,
    routing::get,
    Router,
};

use super::BaseError;
use crate::database::session::Session;
use crate::utils::HttpResult;

async fn list() -> Result<HttpResult<Vec<Session>>, BaseError> {
    Ok(HttpResult::new(Session::list()?))
}

async fn get_session(Path(id): Path<i64>) -> Result<HttpResult<Session>, BaseError> {
    let session = Session::get_by_id(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("session {} not found", id))))?;
    Ok(HttpResult::new(session))
}

async fn delete_session(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Session::delete(id)?;
    Ok(HttpResult::new(()))
}

pub fn create_session_router() -> Router {
    Router::new()
        .route("/sessions", get(list))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
}
