// ABOUTME: Read-only HTTP handlers over the tables loaded into a session
// ABOUTME: Previews df_master or one uploaded file and lists columns and file metadata

use adminless_sandbox::{ManagerError, SessionInfo};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::preamble::python_literal;
use crate::{AppError, AppState};

/// Rows returned by the preview routes
const PREVIEW_ROWS: usize = 100;

const MASTER_PREVIEW_TEMPLATE: &str = r#"
import json
import os
import pandas as pd

_master_path = os.path.join(__UPLOAD_DIR__, 'df_master.pkl')
if os.path.exists(_master_path):
    df_master = pd.read_pickle(_master_path)
    print(json.dumps({
        "data": df_master.head(__ROWS__).fillna("").to_dict(orient='records'),
        "total_rows": len(df_master),
        "columns": [str(c) for c in df_master.columns],
    }, default=str))
else:
    print('{"data": [], "total_rows": 0, "columns": []}')
"#;

const COLUMNS_TEMPLATE: &str = r#"
import json
import os
import pandas as pd

_master_path = os.path.join(__UPLOAD_DIR__, 'df_master.pkl')
if os.path.exists(_master_path):
    df_master = pd.read_pickle(_master_path)
    print(json.dumps({
        "columns": [str(c) for c in df_master.columns],
        "dtypes": {str(k): str(v) for k, v in df_master.dtypes.items()},
    }))
else:
    print('{"columns": [], "dtypes": {}}')
"#;

const FILES_TEMPLATE: &str = r#"
import json
import os

_meta_path = os.path.join(__UPLOAD_DIR__, 'files_meta.json')
if os.path.exists(_meta_path):
    with open(_meta_path, 'r') as f:
        print(json.dumps({"files": json.load(f)}))
else:
    print('{"files": []}')
"#;

const FILE_PREVIEW_TEMPLATE: &str = r#"
import json
import os
import pandas as pd

_pickle_path = os.path.join(__UPLOAD_DIR__, __FILENAME__ + '.pkl')
if os.path.exists(_pickle_path):
    df = pd.read_pickle(_pickle_path)
    print(json.dumps({
        "data": df.head(__ROWS__).fillna("").to_dict(orient='records'),
        "total_rows": len(df),
        "columns": [str(c) for c in df.columns],
    }, default=str))
else:
    print('{"error": "File not found"}')
"#;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

fn render(template: &str, upload_dir: &str) -> String {
    template
        .replace("__UPLOAD_DIR__", &python_literal(upload_dir))
        .replace("__ROWS__", &PREVIEW_ROWS.to_string())
}

/// Strip path separators so a name can only address the upload directory
fn sanitize_filename(filename: &str) -> String {
    filename.replace(['/', '\\'], "")
}

/// Last line of `output` that parses as a JSON object
fn last_json_object(output: &str) -> Option<Map<String, Value>> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

async fn require_info(state: &AppState, session_id: &str) -> Result<SessionInfo, AppError> {
    state
        .manager
        .session_info(session_id)
        .await
        .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()).into())
}

/// Run a query snippet and parse the JSON object it prints
async fn run_query(
    state: &AppState,
    session_id: &str,
    code: &str,
) -> Result<Map<String, Value>, AppError> {
    let result = state.manager.execute(session_id, code).await?;
    if !result.success {
        return Err(AppError::Query(result.error.unwrap_or_default()));
    }

    last_json_object(&result.output)
        .ok_or_else(|| AppError::Query("Failed to parse data response".to_string()))
}

fn with_success(mut body: Map<String, Value>) -> Json<Value> {
    body.insert("success".to_string(), Value::Bool(true));
    Json(Value::Object(body))
}

/// First rows of the merged table
pub async fn get_data_preview(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, AppError> {
    let info = require_info(&state, &query.session_id).await?;
    if !info.data_loaded {
        return Ok(Json(json!({
            "success": false,
            "data": [],
            "total_rows": 0,
            "columns": [],
        })));
    }

    let code = render(MASTER_PREVIEW_TEMPLATE, &state.manager.settings().upload_dir);
    let body = run_query(&state, &query.session_id, &code).await?;
    Ok(with_success(body))
}

/// Column names and pandas dtypes of the merged table
pub async fn get_columns(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, AppError> {
    let info = require_info(&state, &query.session_id).await?;
    if !info.data_loaded {
        return Ok(Json(json!({
            "success": true,
            "columns": [],
            "dtypes": {},
        })));
    }

    let code = render(COLUMNS_TEMPLATE, &state.manager.settings().upload_dir);
    let body = run_query(&state, &query.session_id, &code).await?;
    Ok(with_success(body))
}

/// Per-file metadata recorded by the last upload
pub async fn get_files(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, AppError> {
    let info = require_info(&state, &query.session_id).await?;
    if !info.data_loaded {
        return Ok(Json(json!({"success": true, "files": []})));
    }

    let code = render(FILES_TEMPLATE, &state.manager.settings().upload_dir);
    let body = run_query(&state, &query.session_id, &code).await?;
    Ok(with_success(body))
}

/// First rows of one uploaded file
pub async fn get_file_preview(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, AppError> {
    let info = require_info(&state, &query.session_id).await?;
    let safe_filename = sanitize_filename(&filename);
    if !info.data_loaded || safe_filename.is_empty() {
        return Err(AppError::FileNotFound(filename));
    }

    let code = render(FILE_PREVIEW_TEMPLATE, &state.manager.settings().upload_dir)
        .replace("__FILENAME__", &python_literal(&safe_filename));
    let mut body = run_query(&state, &query.session_id, &code).await?;
    if body.contains_key("error") {
        debug!("No pickle for {} in session {}", safe_filename, query.session_id);
        return Err(AppError::FileNotFound(filename));
    }

    body.insert("filename".to_string(), Value::String(filename));
    Ok(with_success(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_drops_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("dir\\a.csv"), "dira.csv");
        assert_eq!(sanitize_filename("2023 sales.xlsx"), "2023 sales.xlsx");
    }

    #[test]
    fn test_file_preview_snippet_quotes_the_name() {
        let code = render(FILE_PREVIEW_TEMPLATE, "/home/user")
            .replace("__FILENAME__", &python_literal("it's.csv"));
        assert!(code.contains(r#"os.path.join("/home/user", "it's.csv" + '.pkl')"#));
        assert!(code.contains("head(100)"));
    }

    #[test]
    fn test_last_json_object_skips_noise() {
        let body = last_json_object("warming up\n{\"files\": []}\n").unwrap();
        assert_eq!(body.get("files"), Some(&json!([])));
        assert!(last_json_object("Code executed successfully").is_none());
    }
}
