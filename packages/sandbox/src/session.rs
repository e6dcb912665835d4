// ABOUTME: In-memory session record binding a client session to its current sandbox
// ABOUTME: Tracks uploaded files, data-loaded state and the byte backups used for reconnection

use crate::providers::SandboxHandle;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque session identity, generated once and never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Raw file contents keyed by remote path, kept in insertion order
pub type FileBackups = IndexMap<String, Vec<u8>>;

pub struct Session {
    id: SessionId,
    handle: Arc<dyn SandboxHandle>,
    created_at: DateTime<Utc>,
    uploaded_files: Vec<String>,
    data_loaded: bool,
    file_backups: FileBackups,
}

impl Session {
    pub fn new(id: SessionId, handle: Arc<dyn SandboxHandle>) -> Self {
        Self {
            id,
            handle,
            created_at: Utc::now(),
            uploaded_files: Vec::new(),
            data_loaded: false,
            file_backups: FileBackups::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The sandbox currently serving this session
    pub fn handle(&self) -> Arc<dyn SandboxHandle> {
        self.handle.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn uploaded_files(&self) -> &[String] {
        &self.uploaded_files
    }

    pub fn data_loaded(&self) -> bool {
        self.data_loaded
    }

    pub fn set_data_loaded(&mut self, loaded: bool) {
        self.data_loaded = loaded;
    }

    pub fn file_backups(&self) -> &FileBackups {
        &self.file_backups
    }

    /// Record a successful upload: the path is appended and its bytes backed up
    pub fn record_upload(&mut self, path: String, content: Vec<u8>) {
        self.file_backups.insert(path.clone(), content);
        self.uploaded_files.push(path);
    }

    /// Back up a file that exists in the sandbox but was not uploaded by the caller
    pub fn back_up(&mut self, path: String, content: Vec<u8>) {
        self.file_backups.insert(path, content);
    }

    /// Splice in a freshly restored sandbox
    ///
    /// Loaded-data state is derived from the backups so a reconnection never
    /// claims data that could not have been restored.
    pub(crate) fn replace_handle(&mut self, handle: Arc<dyn SandboxHandle>) {
        self.handle = handle;
        self.data_loaded = !self.file_backups.is_empty();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            sandbox_id: self.handle.id().to_string(),
            created_at: self.created_at,
            uploaded_files: self.uploaded_files.clone(),
            data_loaded: self.data_loaded,
            backed_up_files: self.file_backups.keys().cloned().collect(),
        }
    }
}

/// Serializable snapshot of a session for calling layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub sandbox_id: String,
    pub created_at: DateTime<Utc>,
    pub uploaded_files: Vec<String>,
    pub data_loaded: bool,
    pub backed_up_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryProvider;
    use crate::providers::SandboxProvider;
    use std::time::Duration;

    async fn new_session() -> Session {
        let provider = InMemoryProvider::new();
        let handle = provider.provision(Duration::from_secs(60)).await.unwrap();
        Session::new(SessionId::generate(), handle)
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_record_upload_appends_and_backs_up() {
        let mut session = new_session().await;
        session.record_upload("/home/user/a.csv".to_string(), b"x\n1\n".to_vec());
        session.record_upload("/home/user/a.csv".to_string(), b"x\n2\n".to_vec());

        assert_eq!(session.uploaded_files().len(), 2);
        assert_eq!(session.file_backups().len(), 1);
        assert_eq!(
            session.file_backups().get("/home/user/a.csv").unwrap(),
            &b"x\n2\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_replace_handle_derives_data_loaded() {
        let provider = InMemoryProvider::new();
        let mut session = new_session().await;
        session.set_data_loaded(true);

        let fresh = provider.provision(Duration::from_secs(60)).await.unwrap();
        session.replace_handle(fresh);
        assert!(!session.data_loaded());

        session.back_up("/home/user/df_master.pkl".to_string(), vec![1, 2, 3]);
        let fresh = provider.provision(Duration::from_secs(60)).await.unwrap();
        session.replace_handle(fresh.clone());
        assert!(session.data_loaded());
        assert_eq!(session.info().sandbox_id, fresh.id());
    }
}
