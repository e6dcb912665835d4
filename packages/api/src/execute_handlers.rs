// ABOUTME: HTTP handler running user code inside a session's sandbox
// ABOUTME: Loads uploaded tables ahead of the code and separates chart images from the output

use adminless_sandbox::ManagerError;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chart::extract_chart;
use crate::preamble::wrap_with_tables;
use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_image: Option<String>,
    pub results: Vec<String>,
}

/// Run code in a session
///
/// Failures raised by the code come back with `success: false` and a 200.
pub async fn execute_code(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let info = state
        .manager
        .session_info(&request.session_id)
        .await
        .ok_or_else(|| ManagerError::SessionNotFound(request.session_id.clone()))?;

    let code = if info.data_loaded {
        wrap_with_tables(&state.manager.settings().upload_dir, &request.code)
    } else {
        request.code
    };

    let result = state.manager.execute(&request.session_id, &code).await?;
    debug!(
        "Execution in session {} finished (success: {})",
        request.session_id, result.success
    );

    let (output, chart_image) = extract_chart(&result.output);
    Ok(Json(ExecuteResponse {
        success: result.success,
        output,
        error: result.error,
        chart_image,
        results: result.results,
    }))
}
