//! Service endpoints

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{HistoryResponse, ServiceEntry, ServicesResponse, UptimeResponse},
};
use crate::model::{HealthEvent, HealthStatus};

const DEFAULT_HISTORY_LIMIT: usize = 50;

const DEFAULT_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    since: Option<DateTime<Utc>>,
}

fn ensure_known(state: &ApiState, service: &str) -> ApiResult<()> {
    if state.monitor.services().iter().any(|info| info.name == service) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("unknown service '{service}'")))
    }
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> ApiResult<Json<ServicesResponse>> {
    let mut latest: HashMap<String, _> = state
        .monitor
        .storage()
        .latest()
        .await?
        .into_iter()
        .map(|result| (result.service.clone(), result))
        .collect();

    let services: Vec<_> = state
        .monitor
        .services()
        .into_iter()
        .map(|info| {
            let last_result = latest.remove(&info.name);
            ServiceEntry {
                status: last_result.as_ref().map_or(HealthStatus::Unknown, |r| r.status),
                last_check: last_result.as_ref().map(|r| r.timestamp),
                last_result,
                info,
            }
        })
        .collect();

    let count = services.len();
    Ok(Json(ServicesResponse { services, count }))
}

/// GET /api/v1/services/:name/history?limit=N
pub async fn get_history(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    ensure_known(&state, &service)?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 {
        return Err(ApiError::InvalidRequest("limit must be at least 1".to_string()));
    }

    let results = state.monitor.storage().history(&service, limit).await?;
    Ok(Json(HistoryResponse {
        count: results.len(),
        service,
        results,
    }))
}

/// GET /api/v1/services/:name/uptime?since=RFC3339
pub async fn get_uptime(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Query(query): Query<UptimeQuery>,
) -> ApiResult<Json<UptimeResponse>> {
    ensure_known(&state, &service)?;

    let since = query
        .since
        .unwrap_or_else(|| Utc::now() - Duration::hours(DEFAULT_LOOKBACK_HOURS));
    let stats = state.monitor.storage().uptime(&service, since).await?;

    Ok(Json(UptimeResponse {
        since: since.to_rfc3339(),
        stats,
    }))
}

/// POST /api/v1/services/:name/check
///
/// Runs a full probe cycle (retries included) and returns its event
pub async fn check_now(State(state): State<ApiState>, Path(service): Path<String>) -> ApiResult<Json<HealthEvent>> {
    ensure_known(&state, &service)?;
    let event = state.monitor.check_now(&service).await?;
    Ok(Json(event))
}
