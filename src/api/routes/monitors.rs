//! CRUD surface over monitors: `/api/monitors`, `/api/monitors/create`,
//! `/api/monitor`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{CreateMonitorRequest, MonitorDto, MonitorIdQuery, UpdateMonitorRequest};
use crate::error::NanoError;
use crate::events::EventKind;
use crate::store::{MonitorPatch, NewMonitor};

pub async fn list_monitors(State(state): State<ApiState>) -> ApiResult<Json<Vec<MonitorDto>>> {
    let monitors = state.store.list_monitors().await?;
    Ok(Json(monitors.iter().map(MonitorDto::from).collect()))
}

pub async fn get_monitor(
    State(state): State<ApiState>,
    Query(query): Query<MonitorIdQuery>,
) -> ApiResult<Json<MonitorDto>> {
    let monitor = state.store.get_monitor(query.id).await?;
    Ok(Json((&monitor).into()))
}

pub async fn create_monitor(
    State(state): State<ApiState>,
    Json(req): Json<CreateMonitorRequest>,
) -> ApiResult<(StatusCode, Json<MonitorDto>)> {
    if req.name.trim().is_empty() || req.url.trim().is_empty() {
        return Err(NanoError::Validation("name and url are required".to_string()).into());
    }
    let created = state
        .store
        .create_monitor(NewMonitor {
            name: req.name,
            url: req.url,
            icon: req.icon.unwrap_or_default(),
            is_third_party: req.is_third_party.unwrap_or(false),
            check_interval_seconds: req.check_interval.unwrap_or(60),
            config_hash: String::new(),
        })
        .await?;

    state.events.publish(
        EventKind::MonitorAdded,
        serde_json::to_value(MonitorDto::from(&created)).unwrap_or_default(),
    );
    state.events.publish_stats_debounced(&state.store);

    Ok((StatusCode::CREATED, Json((&created).into())))
}

pub async fn update_monitor(
    State(state): State<ApiState>,
    Query(query): Query<MonitorIdQuery>,
    Json(req): Json<UpdateMonitorRequest>,
) -> ApiResult<Json<MonitorDto>> {
    let patch = if req.is_pause_only() {
        MonitorPatch::Pause(req.paused.unwrap_or(false))
    } else {
        let current = state.store.get_monitor(query.id).await?;
        let name = req.name.unwrap_or(current.name);
        let url = req.url.unwrap_or(current.url);
        if name.trim().is_empty() || url.trim().is_empty() {
            return Err(NanoError::Validation("name and url are required".to_string()).into());
        }
        MonitorPatch::Edit {
            name,
            url,
            icon: req.icon.unwrap_or(current.icon),
            check_interval_seconds: req.check_interval.unwrap_or(current.check_interval_seconds),
            is_third_party: req.is_third_party.unwrap_or(current.is_third_party),
        }
    };

    let updated = state.store.update_monitor(query.id, patch, Utc::now()).await?;
    let dto = MonitorDto::from(&updated);
    state
        .events
        .publish(EventKind::MonitorUpdate, serde_json::to_value(&dto).unwrap_or_default());
    state.events.publish_stats_debounced(&state.store);
    Ok(Json(dto))
}

pub async fn delete_monitor(
    State(state): State<ApiState>,
    Query(query): Query<MonitorIdQuery>,
) -> ApiResult<StatusCode> {
    state.store.delete_monitor(query.id).await?;
    state.events.publish(
        EventKind::MonitorDeleted,
        serde_json::json!({ "id": query.id }),
    );
    state.events.publish_stats_debounced(&state.store);
    Ok(StatusCode::NO_CONTENT)
}
