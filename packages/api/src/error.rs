// ABOUTME: API error type mapping manager failures onto HTTP responses
// ABOUTME: Produces a consistent JSON failure body without leaking internals

use adminless_sandbox::ManagerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to load data: {0}")]
    DataLoad(String),

    #[error("Failed to fetch data: {0}")]
    Query(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Failure body shared by every route
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::DataLoad(_) | AppError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::FileNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Manager(manager_error) => match manager_error {
                ManagerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                ManagerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ManagerError::SandboxUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ManagerError::Provisioning(_)
                | ManagerError::RemoteExecution(_)
                | ManagerError::Transport(_)
                | ManagerError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
