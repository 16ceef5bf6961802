use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use super::{
    DefaultValueQuery, FeatureEvaluationRequest, FeatureResponse, FeatureValueRequest,
    FeatureValueResponse,
};
use crate::refresh::RefreshTrigger;
use crate::routes::error::ApiError;
use crate::state::AppState;

/// Get feature status by key
pub async fn get(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
) -> Result<Json<FeatureResponse>, ApiError> {
    info!(feature_key, "getting feature");

    let evaluation = state.flags.lookup(&feature_key)?;
    let enabled = evaluation.is_on();

    Ok(Json(FeatureResponse::new(feature_key, enabled, evaluation.value)))
}

/// Evaluate feature with user attributes
pub async fn evaluate(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Json(request): Json<FeatureEvaluationRequest>,
) -> Result<Json<FeatureResponse>, ApiError> {
    info!(feature_key, "evaluating feature with user attributes");

    let enabled = state
        .flags
        .is_enabled_for_user(&feature_key, request.into_attributes())
        .await?;

    Ok(Json(FeatureResponse::new(
        feature_key,
        enabled,
        Some(Value::Bool(enabled)),
    )))
}

/// Get any JSON value for a user, falling back to the supplied default
pub async fn value_for_user(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Json(request): Json<FeatureValueRequest>,
) -> Json<FeatureValueResponse<Value>> {
    info!(feature_key, "getting feature value with user attributes");

    let default_value = request.default_value;
    let value = state
        .flags
        .get_value_for_user(
            &feature_key,
            default_value.clone(),
            request.user.into_attributes(),
        )
        .await;

    Json(FeatureValueResponse::new(feature_key, value, default_value))
}

pub async fn string_value(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Query(query): Query<DefaultValueQuery<String>>,
) -> Json<FeatureValueResponse<String>> {
    typed_value(&state, feature_key, query.default_value.unwrap_or_default())
}

pub async fn boolean_value(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Query(query): Query<DefaultValueQuery<bool>>,
) -> Json<FeatureValueResponse<bool>> {
    typed_value(&state, feature_key, query.default_value.unwrap_or(false))
}

pub async fn integer_value(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Query(query): Query<DefaultValueQuery<i64>>,
) -> Json<FeatureValueResponse<i64>> {
    typed_value(&state, feature_key, query.default_value.unwrap_or(0))
}

pub async fn double_value(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
    Query(query): Query<DefaultValueQuery<f64>>,
) -> Json<FeatureValueResponse<f64>> {
    typed_value(&state, feature_key, query.default_value.unwrap_or(0.0))
}

/// Refresh features from the flag service
pub async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    info!("refreshing features on request");

    state.refresher.refresh(RefreshTrigger::Manual).await?;

    Ok(StatusCode::OK)
}

fn typed_value<T>(state: &AppState, feature_key: String, default_value: T) -> Json<FeatureValueResponse<T>>
where
    T: DeserializeOwned + PartialEq + Clone,
{
    info!(feature_key, "getting typed feature value");

    let value = state.flags.get_value(&feature_key, default_value.clone());

    Json(FeatureValueResponse::new(feature_key, value, default_value))
}
