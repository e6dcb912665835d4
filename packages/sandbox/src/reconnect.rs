// ABOUTME: Reconnection protocol replacing a dead sandbox with a freshly restored one
// ABOUTME: Provisions, bootstraps, replays file backups and swaps the handle into the session

use crate::providers::{ProviderError, SandboxHandle, SandboxProvider};
use crate::session::Session;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Provisions sandboxes and brings them to the session's baseline state
#[derive(Clone)]
pub struct Reconnector {
    provider: Arc<dyn SandboxProvider>,
    sandbox_timeout: Duration,
    bootstrap_code: String,
}

impl Reconnector {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        sandbox_timeout: Duration,
        bootstrap_code: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            sandbox_timeout,
            bootstrap_code: bootstrap_code.into(),
        }
    }

    /// Provision a sandbox and run the environment bootstrap on it
    ///
    /// A sandbox whose bootstrap fails is released before returning.
    pub async fn provision_bootstrapped(
        &self,
    ) -> Result<Arc<dyn SandboxHandle>, ProviderError> {
        let handle = self.provider.provision(self.sandbox_timeout).await?;

        if let Err(e) = self.bootstrap(handle.as_ref()).await {
            handle.release().await;
            return Err(e);
        }

        Ok(handle)
    }

    async fn bootstrap(&self, handle: &dyn SandboxHandle) -> Result<(), ProviderError> {
        let output = handle.run_code(&self.bootstrap_code).await?;
        match output.error {
            None => Ok(()),
            Some(remote) => Err(ProviderError::ProvisioningError(format!(
                "Environment bootstrap failed on {}: {}",
                handle.id(),
                remote
            ))),
        }
    }

    /// Replace the session's sandbox with a new, fully restored one
    ///
    /// Returns false and leaves the session untouched if any step fails. The
    /// old handle is not released; it is assumed to be unreachable already.
    pub async fn reconnect(&self, session: &mut Session) -> bool {
        let start = Instant::now();
        let old_id = session.handle().id().to_string();
        info!(
            "Reconnecting session {} (sandbox {} via {})",
            session.id(),
            old_id,
            self.provider.name()
        );

        let handle = match self.provision_bootstrapped().await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Reconnection failed for session {}: {}", session.id(), e);
                return false;
            }
        };

        // One write at a time; a fresh sandbox is easy to overwhelm
        for (path, content) in session.file_backups() {
            if let Err(e) = handle.write_file(path, content).await {
                error!(
                    "Reconnection failed for session {} while restoring {}: {}",
                    session.id(),
                    path,
                    e
                );
                handle.release().await;
                return false;
            }
        }

        let restored = session.file_backups().len();
        let new_id = handle.id().to_string();
        session.replace_handle(handle);

        info!(
            "Session {} reconnected: {} -> {} ({} files restored, {}ms)",
            session.id(),
            old_id,
            new_id,
            restored,
            start.elapsed().as_millis()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{RemoteError, RunOutput};
    use crate::session::SessionId;
    use crate::settings::DEFAULT_BOOTSTRAP_CODE;
    use crate::testing::InMemoryProvider;

    async fn setup(provider: &InMemoryProvider) -> (Reconnector, Session) {
        let reconnector = Reconnector::new(
            Arc::new(provider.clone()),
            Duration::from_secs(60),
            DEFAULT_BOOTSTRAP_CODE,
        );
        let handle = reconnector.provision_bootstrapped().await.unwrap();
        (reconnector, Session::new(SessionId::generate(), handle))
    }

    #[tokio::test]
    async fn test_reconnect_restores_backups_in_order() {
        let provider = InMemoryProvider::new();
        let (reconnector, mut session) = setup(&provider).await;
        session.record_upload("/home/user/b.csv".to_string(), b"b".to_vec());
        session.record_upload("/home/user/a.csv".to_string(), b"a".to_vec());
        provider.latest_sandbox().unwrap().kill();

        assert!(reconnector.reconnect(&mut session).await);

        let fresh = provider.latest_sandbox().unwrap();
        assert_eq!(session.handle().id(), fresh.id());
        let paths: Vec<String> = fresh.files().keys().cloned().collect();
        assert_eq!(paths, vec!["/home/user/b.csv", "/home/user/a.csv"]);
        assert!(session.data_loaded());
        assert_eq!(fresh.runs_containing("Dependencies ready"), 1);
    }

    #[tokio::test]
    async fn test_reconnect_without_backups_clears_data_loaded() {
        let provider = InMemoryProvider::new();
        let (reconnector, mut session) = setup(&provider).await;
        session.set_data_loaded(true);

        assert!(reconnector.reconnect(&mut session).await);
        assert!(!session.data_loaded());
        assert_eq!(provider.provision_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_provisioning_leaves_session_untouched() {
        let provider = InMemoryProvider::new();
        let (reconnector, mut session) = setup(&provider).await;
        session.set_data_loaded(true);
        let original = session.handle().id().to_string();

        provider.set_fail_provisioning(true);
        assert!(!reconnector.reconnect(&mut session).await);
        assert_eq!(session.handle().id(), original);
        assert!(session.data_loaded());
    }

    #[tokio::test]
    async fn test_failed_replay_releases_new_sandbox() {
        let provider = InMemoryProvider::new();
        let (reconnector, mut session) = setup(&provider).await;
        session.record_upload("/home/user/a.csv".to_string(), b"a".to_vec());
        let original = session.handle().id().to_string();

        provider.set_fail_writes(true);
        assert!(!reconnector.reconnect(&mut session).await);
        assert_eq!(session.handle().id(), original);
        assert!(provider.latest_sandbox().unwrap().is_released());
    }

    #[tokio::test]
    async fn test_bootstrap_error_fails_provisioning() {
        let provider = InMemoryProvider::with_interpreter(|code, _| {
            if code.contains("pip") {
                RunOutput {
                    error: Some(RemoteError {
                        name: "ModuleNotFoundError".to_string(),
                        value: "No module named 'pandas'".to_string(),
                        traceback: String::new(),
                    }),
                    ..Default::default()
                }
            } else {
                RunOutput::default()
            }
        });
        let reconnector = Reconnector::new(
            Arc::new(provider.clone()),
            Duration::from_secs(60),
            DEFAULT_BOOTSTRAP_CODE,
        );

        let result = reconnector.provision_bootstrapped().await;
        assert!(matches!(result, Err(ProviderError::ProvisioningError(_))));
        assert!(provider.latest_sandbox().unwrap().is_released());
    }
}
