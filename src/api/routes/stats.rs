//! `GET /api/stats` and `GET /api/response-time`.

use axum::extract::{Query, State};
use axum::Json;

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{HistoryQuery, ResponseTimePointDto, StatsDto};
use crate::stats::{self, HistoryRange};

pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsDto>> {
    let stats = stats::fleet_stats(&state.store, chrono::Utc::now()).await?;
    Ok(Json(stats.into()))
}

pub async fn get_response_time(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ResponseTimePointDto>>> {
    let range = HistoryRange::parse(query.range.as_deref().unwrap_or("24h"));
    let points = stats::history(&state.store, query.id, range, chrono::Utc::now()).await?;
    Ok(Json(points.into_iter().map(Into::into).collect()))
}
