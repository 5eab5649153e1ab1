//! Bearer token authentication
//!
//! The health endpoint stays open so load balancers and orchestrators can
//! probe the service without credentials.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

const UNAUTHENTICATED_PATHS: &[&str] = &["/api/v1/health"];

pub async fn auth_middleware(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if UNAUTHENTICATED_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(&request)?;
    if token != expected_token {
        debug!("rejected request to {} with wrong token", request.uri().path());
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request<Body>) -> Result<&str, AuthError> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing Authorization header"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "expected Authorization: Bearer <token>",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "invalid token"),
        };

        (status, message).into_response()
    }
}
