// ABOUTME: HTTP API layer exposing the session manager over axum
// ABOUTME: Wires session, upload, execution and data routes onto a shared manager state

use adminless_sandbox::SessionManager;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub mod chart;
pub mod data_handlers;
pub mod error;
pub mod execute_handlers;
pub mod health;
pub mod preamble;
pub mod session_handlers;
pub mod upload_handlers;

pub use error::AppError;

/// Largest request body accepted, sized for spreadsheet uploads
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

/// Build the full API router around a session manager
pub fn create_router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/session/create", post(session_handlers::create_session))
        .route(
            "/api/session/{id}",
            get(session_handlers::get_session).delete(session_handlers::delete_session),
        )
        .route("/api/upload", post(upload_handlers::upload_files))
        .route("/api/execute", post(execute_handlers::execute_code))
        .route("/api/data/preview", get(data_handlers::get_data_preview))
        .route("/api/data/columns", get(data_handlers::get_columns))
        .route("/api/data/files", get(data_handlers::get_files))
        .route(
            "/api/data/preview/{filename}",
            get(data_handlers::get_file_preview),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(AppState::new(manager))
}
