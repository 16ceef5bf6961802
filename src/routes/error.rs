use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::evaluation::EvaluationError;
use crate::fetcher::FetchError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Error evaluating feature: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Failed to refresh features: {0}")]
    Refresh(#[from] FetchError),
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Both are upstream or engine failures, never the caller's fault
        let status = StatusCode::INTERNAL_SERVER_ERROR;

        let body = Json(ApiErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
