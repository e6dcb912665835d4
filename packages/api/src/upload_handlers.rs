// ABOUTME: HTTP handler for uploading data files into a session
// ABOUTME: Writes files to the sandbox, loads them into tables and backs up the derived pickles

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::preamble::{data_load_snippet, derived_files, parse_metadata, FileMetadata};
use crate::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub session_id: String,
    pub files_uploaded: Vec<String>,
    pub total_rows: u64,
    pub columns: Vec<String>,
    pub files: Vec<FileMetadata>,
}

struct UploadForm {
    session_id: String,
    files: Vec<(String, Vec<u8>)>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut session_id = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("session_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                session_id = Some(text.trim().to_string());
            }
            Some("files") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("File part without a name".to_string()))?;
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                files.push((filename, content.to_vec()));
            }
            _ => {}
        }
    }

    let session_id = session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("session_id is required".to_string()))?;
    if files.is_empty() {
        return Err(AppError::Validation("At least one file is required".to_string()));
    }

    Ok(UploadForm { session_id, files })
}

/// Upload files to a session and load them into `df_master`
pub async fn upload_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_form(multipart).await?;
    let manager = &state.manager;
    let session_id = form.session_id.as_str();
    let upload_dir = manager.settings().upload_dir.clone();

    let mut files_uploaded = Vec::with_capacity(form.files.len());
    for (filename, content) in form.files {
        manager.upload_file(session_id, &filename, content).await?;
        files_uploaded.push(filename);
    }

    let load = manager
        .execute(session_id, &data_load_snippet(&upload_dir, &files_uploaded))
        .await?;
    if !load.success {
        return Err(AppError::DataLoad(load.error.unwrap_or_default()));
    }
    manager.set_data_loaded(session_id, true).await?;

    let metadata = parse_metadata(&load.output);
    info!(
        "Loaded {} file(s) with {} rows into session {}",
        files_uploaded.len(),
        metadata.total_rows,
        session_id
    );

    for path in derived_files(&upload_dir, &files_uploaded) {
        if let Err(e) = manager.backup_remote_file(session_id, &path).await {
            warn!("Could not back up {} for session {}: {}", path, session_id, e);
        }
    }

    Ok(Json(UploadResponse {
        success: true,
        session_id: form.session_id.clone(),
        files_uploaded,
        total_rows: metadata.total_rows,
        columns: metadata.columns,
        files: metadata.files,
    }))
}
