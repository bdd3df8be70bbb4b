//! Pipeline statistics endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let stats = state.monitor.stats().await?;

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        services: stats.services,
        open_alerts: stats.open_alerts,
        muted: stats.muted,
        engine: stats.engine,
        router: stats.router,
        storage: stats.storage,
    }))
}
