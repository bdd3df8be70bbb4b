//! Alert endpoints

use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::alerts::AlertState;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertsResponse, MuteRequest},
};

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// `active`, `suppressed`, `resolved` or `open` (active + suppressed)
    state: Option<String>,
}

/// GET /api/v1/alerts?state=open
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let filter: Box<dyn Fn(AlertState) -> bool + Send> = match query.state.as_deref() {
        None => Box::new(|_| true),
        Some("open") => Box::new(|s: AlertState| s.is_open()),
        Some("active") => Box::new(|s| s == AlertState::Active),
        Some("suppressed") => Box::new(|s| s == AlertState::Suppressed),
        Some("resolved") => Box::new(|s| s == AlertState::Resolved),
        Some(other) => return Err(ApiError::InvalidRequest(format!("unknown alert state '{other}'"))),
    };

    let snapshot = state.monitor.snapshot().await?;
    let alerts: Vec<_> = snapshot.alerts.into_iter().filter(|a| filter(a.state)).collect();

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
        muted: state.monitor.is_muted(),
    }))
}

/// POST /api/v1/alerts/mute
pub async fn mute(State(state): State<ApiState>, Json(request): Json<MuteRequest>) -> ApiResult<StatusCode> {
    if request.duration_secs == 0 {
        return Err(ApiError::InvalidRequest("duration_secs must be at least 1".to_string()));
    }
    state.monitor.mute(Duration::from_secs(request.duration_secs)).await?;
    Ok(StatusCode::ACCEPTED)
}

/// DELETE /api/v1/alerts/mute
pub async fn unmute(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.monitor.unmute().await?;
    Ok(StatusCode::ACCEPTED)
}
