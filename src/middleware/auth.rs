use crate::handlers::auth::verify_jwt_token;
use crate::models::auth::ErrorResponse;
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};

/// Rejects requests without a valid bearer token. On success the decoded
/// claims are placed in request extensions for downstream handlers.
pub async fn auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = bearer_token(&headers)?;

    let claims = verify_jwt_token(token).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        unauthorized("Invalid or expired token")
    })?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, (StatusCode, Json<ErrorResponse>)> {
    let header = headers
        .get("Authorization")
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let value = header
        .to_str()
        .map_err(|_| unauthorized("Invalid Authorization header format"))?;

    value.strip_prefix("Bearer ").ok_or_else(|| {
        unauthorized("Invalid Authorization header format. Expected 'Bearer <token>'")
    })
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            success: false,
            message: message.to_string(),
        }),
    )
}
