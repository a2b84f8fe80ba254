//! `GET /api/monitors/export` — serializes the current monitor list back
//! into the YAML shape `config::reconcile` accepts.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::config;

pub async fn export_monitors(State(state): State<ApiState>) -> ApiResult<Response> {
    let monitors = state.store.list_monitors().await?;
    let yaml = config::export_yaml(&monitors)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/x-yaml"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=monitors.yaml",
            ),
        ],
        yaml,
    )
        .into_response())
}
