// ABOUTME: One-shot execution in a throwaway session
// ABOUTME: Creates a session, uploads local files, runs code and always destroys the session

use adminless_api::preamble::{data_load_snippet, wrap_with_tables};
use adminless_sandbox::{ExecutionResult, SessionManager};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Run `code` once, with `files` loaded as tables first
pub async fn exec_once(
    manager: &SessionManager,
    files: &[PathBuf],
    code: &str,
) -> Result<ExecutionResult> {
    let session_id = manager.create_session().await?;
    info!("Created throwaway session {}", session_id);

    let result = run_in_session(manager, session_id.as_str(), files, code).await;
    manager.destroy_session(session_id.as_str()).await;
    result
}

async fn run_in_session(
    manager: &SessionManager,
    session_id: &str,
    files: &[PathBuf],
    code: &str,
) -> Result<ExecutionResult> {
    if files.is_empty() {
        return Ok(manager.execute(session_id, code).await?);
    }

    let mut filenames = Vec::with_capacity(files.len());
    for path in files {
        let filename = file_name(path)?;
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        manager.upload_file(session_id, &filename, content).await?;
        filenames.push(filename);
    }

    let upload_dir = manager.settings().upload_dir.clone();
    let load = manager
        .execute(session_id, &data_load_snippet(&upload_dir, &filenames))
        .await?;
    if !load.success {
        bail!(
            "Failed to load data: {}",
            load.error.unwrap_or_default()
        );
    }
    manager.set_data_loaded(session_id, true).await?;

    Ok(manager
        .execute(session_id, &wrap_with_tables(&upload_dir, code))
        .await?)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Not a file path: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adminless_sandbox::testing::InMemoryProvider;
    use adminless_sandbox::SandboxSettings;
    use std::sync::Arc;

    fn manager(provider: &InMemoryProvider) -> SessionManager {
        SessionManager::new(Arc::new(provider.clone()), SandboxSettings::default())
    }

    #[tokio::test]
    async fn test_exec_without_files() {
        let provider = InMemoryProvider::new();
        let manager = manager(&provider);

        let result = exec_once(&manager, &[], "print('hello')").await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello");
        assert_eq!(manager.session_count().await, 0);
        assert!(provider.latest_sandbox().unwrap().is_released());
    }

    #[tokio::test]
    async fn test_exec_uploads_files_and_wraps_code() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("sales.csv");
        std::fs::write(&csv, "id,total\n1,10\n").unwrap();

        let provider = InMemoryProvider::new();
        let manager = manager(&provider);

        let result = exec_once(&manager, &[csv], "print('done')").await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "done");

        let sandbox = provider.latest_sandbox().unwrap();
        assert_eq!(
            sandbox.files().get("/home/user/sales.csv"),
            Some(&b"id,total\n1,10\n".to_vec())
        );
        assert_eq!(sandbox.runs_containing("_master_path"), 1);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_exec_destroys_session_on_failure() {
        let provider = InMemoryProvider::new();
        let manager = manager(&provider);

        let missing = PathBuf::from("/definitely/not/here.csv");
        let result = exec_once(&manager, &[missing], "print('x')").await;
        assert!(result.is_err());
        assert_eq!(manager.session_count().await, 0);
    }
}
