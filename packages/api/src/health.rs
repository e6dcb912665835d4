// ABOUTME: Service health endpoint
// ABOUTME: Reports liveness and the number of active sessions

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_sessions": state.manager.session_count().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
