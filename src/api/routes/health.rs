//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Always answers; `storage_healthy` tells whether the history backend still works
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let storage_healthy = state
        .monitor
        .storage()
        .health_check()
        .await
        .map(|health| health.healthy)
        .unwrap_or(false);

    Json(HealthResponse {
        status: "ok".to_string(),
        storage_healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
