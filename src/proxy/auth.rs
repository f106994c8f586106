use axum::{
    body::Body,
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde_json::json;
use tracing::{error, warn};

use crate::database::user::User;

/// The resolved caller identity, attached to the request for downstream
/// handlers.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub i64);

#[derive(Debug)]
pub enum AuthError {
    Missing,
    Invalid,
    Store(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::Missing => (StatusCode::UNAUTHORIZED, "missing API key".to_string()),
            AuthError::Invalid => (StatusCode::UNAUTHORIZED, "invalid API key".to_string()),
            AuthError::Store(msg) => {
                error!("auth store lookup failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Resolves the bearer credential to a user and rejects the request with 401
/// before it ever reaches routing.
pub async fn require_api_key(mut req: Request, next: Next) -> Result<Response<Body>, AuthError> {
    let api_key = extract_api_key(req.headers()).ok_or(AuthError::Missing)?;

    let user = User::get_by_api_key(&api_key)
        .map_err(|e| AuthError::Store(format!("{:?}", e)))?
        .ok_or_else(|| {
            warn!("rejected request with unknown api key");
            AuthError::Invalid
        })?;

    req.extensions_mut().insert(AuthedUser(user.id));
    Ok(next.run(req).await)
}

/// Pulls the token out of `Authorization: Bearer <token>`. The scheme match
/// is case-insensitive and surrounding whitespace is trimmed.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_plain_bearer() {
        assert_eq!(
            extract_api_key(&headers_with("Bearer sk-123")).as_deref(),
            Some("sk-123")
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert_eq!(
            extract_api_key(&headers_with("bearer sk-123")).as_deref(),
            Some("sk-123")
        );
        assert_eq!(
            extract_api_key(&headers_with("BEARER sk-123")).as_deref(),
            Some("sk-123")
        );
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(
            extract_api_key(&headers_with("Bearer   sk-123  ")).as_deref(),
            Some("sk-123")
        );
    }

    #[test]
    fn test_rejects_other_schemes_and_garbage() {
        assert!(extract_api_key(&headers_with("Basic sk-123")).is_none());
        assert!(extract_api_key(&headers_with("Bearer ")).is_none());
        assert!(extract_api_key(&headers_with("sk-123")).is_none());
        assert!(extract_api_key(&HeaderMap::new()).is_none());
    }
}
