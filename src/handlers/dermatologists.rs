// src/handlers/dermatologists.rs
//
// Directory maintenance for the dermatologist table. The orchestrator only
// reads this table; rows are created here (or loaded out of band).

use crate::middleware::auth::auth_middleware;
use crate::models::assistant::{Dermatologist, NewDermatologist};
use crate::models::auth::{Claims, ErrorResponse};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn dermatologist_routes() -> Router {
    let public_routes = Router::new().route("/api/dermatologists", get(list_dermatologists));

    let protected_routes = Router::new()
        .route("/api/dermatologists", post(create_dermatologist))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

async fn list_dermatologists(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let rows = sqlx::query_as::<_, Dermatologist>(
        "SELECT id, name, email, specialization, phone_number FROM dermatologists ORDER BY name",
    )
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list dermatologists: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                success: false,
                message: "Internal server error".to_string(),
            }),
        )
    })?;

    Ok(Json(serde_json::json!({
        "success": true,
        "dermatologists": rows
    })))
}

async fn create_dermatologist(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NewDermatologist>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<ErrorResponse>)> {
    if payload.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Name is required".to_string(),
            }),
        ));
    }

    let row = sqlx::query_as::<_, Dermatologist>(
        "INSERT INTO dermatologists (name, email, specialization, phone_number)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, email, specialization, phone_number",
    )
    .bind(payload.name.trim())
    .bind(&payload.email)
    .bind(
        payload
            .specialization
            .as_deref()
            .unwrap_or("General Dermatology"),
    )
    .bind(&payload.phone_number)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create dermatologist: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                success: false,
                message: "Failed to create dermatologist".to_string(),
            }),
        )
    })?;

    tracing::info!("Dermatologist {} created by user {}", row.id, claims.sub);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "dermatologist": row
        })),
    ))
}
