use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::utils::log;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing {} header", super::SESSION_HEADER)]
    MissingSession,

    #[error("{} is not a valid UUID", super::SESSION_HEADER)]
    InvalidSession,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingSession | ApiError::InvalidSession => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = format!("{self:#}");
        if status.is_server_error() {
            log::error(format!("Request failed: {message}"));
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
