// ABOUTME: HTTP request handlers for session lifecycle operations
// ABOUTME: Creates, inspects and destroys sessions backed by remote sandboxes

use adminless_sandbox::{ManagerError, SessionInfo};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteSessionResponse {
    pub success: bool,
    pub message: String,
}

/// Create a session with a fresh sandbox
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let session_id = state.manager.create_session().await?;
    info!("Session {} created over HTTP", session_id);

    Ok(Json(CreateSessionResponse {
        session_id: session_id.to_string(),
        message: "Session created successfully".to_string(),
    }))
}

/// Get a snapshot of a session
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, AppError> {
    state
        .manager
        .session_info(&id)
        .await
        .map(Json)
        .ok_or_else(|| ManagerError::SessionNotFound(id).into())
}

/// Destroy a session and release its sandbox
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    if !state.manager.destroy_session(&id).await {
        return Err(ManagerError::SessionNotFound(id).into());
    }

    Ok(Json(DeleteSessionResponse {
        success: true,
        message: "Session destroyed".to_string(),
    }))
}
