//! Bearer token check for operator actions

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;

pub async fn require_token(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("expected 'Bearer <token>'".to_string()))?;

    if token != expected_token {
        return Err(ApiError::Unauthorized("invalid token".to_string()));
    }

    Ok(next.run(request).await)
}
