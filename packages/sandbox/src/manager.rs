// ABOUTME: Session registry owning every live session and its sandbox
// ABOUTME: Creates, looks up and destroys sessions and routes uploads and code runs through the pipeline

use crate::executor::{ExecutionPipeline, ExecutionResult};
use crate::health::LivenessProber;
use crate::providers::SandboxProvider;
use crate::reconnect::Reconnector;
use crate::session::{Session, SessionId, SessionInfo};
use crate::settings::SandboxSettings;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Marker printed by the backup snippet when the requested file is missing
const FILE_NOT_FOUND_MARKER: &str = "FILE_NOT_FOUND";

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to provision sandbox: {0}")]
    Provisioning(String),

    #[error("Sandbox for session {0} expired and could not be restored. Please refresh and re-upload your files.")]
    SandboxUnavailable(String),

    #[error("Remote execution error: {0}")]
    RemoteExecution(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to decode sandbox output: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Registry of sessions, constructed once per process and shared by reference
pub struct SessionManager {
    settings: SandboxSettings,
    reconnector: Reconnector,
    pipeline: ExecutionPipeline,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, settings: SandboxSettings) -> Self {
        let reconnector = Reconnector::new(
            provider,
            settings.sandbox_timeout,
            settings.bootstrap_code.clone(),
        );
        let pipeline = ExecutionPipeline::new(
            LivenessProber::new(settings.probe_code.clone()),
            reconnector.clone(),
        );

        Self {
            settings,
            reconnector,
            pipeline,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Create a session backed by a freshly provisioned, bootstrapped sandbox
    pub async fn create_session(&self) -> Result<SessionId> {
        let handle = self
            .reconnector
            .provision_bootstrapped()
            .await
            .map_err(|e| ManagerError::Provisioning(e.to_string()))?;

        let id = SessionId::generate();
        info!("Created session {} with sandbox {}", id, handle.id());

        let session = Session::new(id.clone(), handle);
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));

        Ok(id)
    }

    /// Look up a session record
    pub async fn get_session(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn require_session(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        self.get_session(id)
            .await
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))
    }

    pub async fn session_info(&self, id: &str) -> Option<SessionInfo> {
        let session = self.get_session(id).await?;
        let session = session.lock().await;
        Some(session.info())
    }

    pub async fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove a session and release its sandbox
    ///
    /// The record is dropped even if the release fails.
    pub async fn destroy_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            return false;
        };

        let session = session.lock().await;
        session.handle().release().await;
        info!("Destroyed session {}", id);
        true
    }

    /// Destroy every remaining session
    pub async fn shutdown(&self) {
        let ids = self.list_sessions().await;
        info!("Shutting down, cleaning up {} sessions", ids.len());
        for id in ids {
            self.destroy_session(id.as_str()).await;
        }
    }

    /// Run code in a session's sandbox
    ///
    /// Faults raised by the code and transport failures that survive the
    /// retry are reported inside the returned result.
    pub async fn execute(&self, id: &str, code: &str) -> Result<ExecutionResult> {
        let session = self.require_session(id).await?;
        let mut session = session.lock().await;
        self.pipeline.execute(&mut session, code).await
    }

    /// Force a reconnection of a session's sandbox
    pub async fn reconnect_session(&self, id: &str) -> Result<bool> {
        let session = self.require_session(id).await?;
        let mut session = session.lock().await;
        Ok(self.reconnector.reconnect(&mut session).await)
    }

    /// Write an uploaded file into the sandbox and back it up
    ///
    /// Returns the remote path the file was written to.
    pub async fn upload_file(&self, id: &str, filename: &str, content: Vec<u8>) -> Result<String> {
        validate_filename(filename)?;
        let session = self.require_session(id).await?;
        let mut session = session.lock().await;

        let path = self.settings.upload_path(filename);
        let remote_path = path.as_str();
        let bytes = content.as_slice();
        self.pipeline
            .with_recovery(&mut session, move |handle| {
                Box::pin(async move { handle.write_file(remote_path, bytes).await })
            })
            .await?;

        debug!(
            "Uploaded {} ({} bytes) to session {}",
            path,
            content.len(),
            id
        );
        session.record_upload(path.clone(), content);
        Ok(path)
    }

    pub async fn set_data_loaded(&self, id: &str, loaded: bool) -> Result<()> {
        let session = self.require_session(id).await?;
        session.lock().await.set_data_loaded(loaded);
        Ok(())
    }

    /// Copy a file produced inside the sandbox into the session's backups
    ///
    /// Returns false if the file does not exist in the sandbox.
    pub async fn backup_remote_file(&self, id: &str, path: &str) -> Result<bool> {
        if path.contains('\'') || path.contains('\n') || !path.starts_with('/') {
            return Err(ManagerError::InvalidInput(format!(
                "Unsupported backup path: {}",
                path
            )));
        }

        let session = self.require_session(id).await?;
        let mut session = session.lock().await;

        // Raw stdout: an empty file prints an empty payload
        let snippet = read_file_snippet(path);
        let code = snippet.as_str();
        let run = self
            .pipeline
            .with_recovery(&mut session, move |handle| {
                Box::pin(async move { handle.run_code(code).await })
            })
            .await?;
        if let Some(error) = run.error {
            return Err(ManagerError::RemoteExecution(error.to_string()));
        }

        let stdout = run.stdout_text();
        let encoded = stdout.trim();
        if encoded == FILE_NOT_FOUND_MARKER {
            debug!("Nothing to back up at {} for session {}", path, id);
            return Ok(false);
        }

        let content = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ManagerError::Decode(e.to_string()))?;
        debug!(
            "Backed up {} ({} bytes) for session {}",
            path,
            content.len(),
            id
        );
        session.back_up(path.to_string(), content);
        Ok(true)
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.trim().is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');

    if invalid {
        return Err(ManagerError::InvalidInput(format!(
            "Invalid file name: {:?}",
            filename
        )));
    }
    Ok(())
}

fn read_file_snippet(path: &str) -> String {
    format!(
        r#"
import base64
try:
    with open('{path}', 'rb') as f:
        print(base64.b64encode(f.read()).decode())
except FileNotFoundError:
    print('{marker}')
"#,
        path = path,
        marker = FILE_NOT_FOUND_MARKER
    )
}
