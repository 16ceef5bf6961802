use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::refresh::RefreshStatus;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    status: u16,
    evaluation_enabled: bool,
    live_ephemeral_contexts: usize,
    refresh: RefreshStatus,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthData> {
    let health_data = HealthData {
        status: StatusCode::OK.as_u16(),
        evaluation_enabled: state.flags.evaluation_enabled(),
        live_ephemeral_contexts: state.flags.live_ephemeral_contexts(),
        refresh: state.refresher.status(),
    };
    Json(health_data)
}
