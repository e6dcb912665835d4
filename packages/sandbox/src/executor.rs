// ABOUTME: Execution pipeline running code against a session with probe, reconnect and one retry
// ABOUTME: Shapes raw sandbox output into the structured result returned to callers

use crate::health::LivenessProber;
use crate::manager::ManagerError;
use crate::providers::{ProviderError, RunOutput, SandboxHandle};
use crate::reconnect::Reconnector;
use crate::session::Session;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Output reported when a run succeeds without printing or returning anything
pub const SUCCESS_PLACEHOLDER: &str = "Code executed successfully";

/// Result of running a snippet in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<String>,
}

impl ExecutionResult {
    /// Build the caller-facing result from a completed remote run
    ///
    /// On success, printed output wins over the last result value, which
    /// wins over the placeholder.
    pub fn from_run(run: RunOutput) -> Self {
        let stdout = run.stdout_text();

        if let Some(error) = run.error {
            return Self {
                success: false,
                output: stdout,
                error: Some(error.to_string()),
                results: run.results,
            };
        }

        let output = if !stdout.is_empty() {
            stdout
        } else if let Some(last) = run.results.last() {
            last.clone()
        } else {
            SUCCESS_PLACEHOLDER.to_string()
        };

        Self {
            success: true,
            output,
            error: None,
            results: run.results,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            results: Vec::new(),
        }
    }
}

/// Probe-or-reconnect, attempt, and on a transport fault reconnect and
/// attempt exactly once more
#[derive(Clone)]
pub struct ExecutionPipeline {
    prober: LivenessProber,
    reconnector: Reconnector,
}

impl ExecutionPipeline {
    pub fn new(prober: LivenessProber, reconnector: Reconnector) -> Self {
        Self {
            prober,
            reconnector,
        }
    }

    /// Make sure the session has a responsive sandbox, reconnecting if needed
    pub async fn ensure_live(&self, session: &mut Session) -> Result<(), ManagerError> {
        let handle = session.handle();
        if self.prober.is_alive(handle.as_ref()).await {
            return Ok(());
        }

        warn!(
            "Sandbox expired for session {}, attempting reconnection",
            session.id()
        );
        if self.reconnector.reconnect(session).await {
            info!("Reconnection successful for session {}", session.id());
            Ok(())
        } else {
            Err(ManagerError::SandboxUnavailable(session.id().to_string()))
        }
    }

    /// Run `op` against the session's sandbox with the shared recovery policy
    ///
    /// Transport failures that survive the single retry come back as
    /// `ManagerError::Transport`.
    pub async fn with_recovery<'a, T, F>(
        &self,
        session: &mut Session,
        op: F,
    ) -> Result<T, ManagerError>
    where
        T: Send,
        F: Fn(Arc<dyn SandboxHandle>) -> BoxFuture<'a, Result<T, ProviderError>> + Send + Sync,
    {
        self.ensure_live(session).await?;

        let first = match op(session.handle()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        warn!(
            "Transport failure in session {}: {}; reconnecting for one retry",
            session.id(),
            first
        );
        if !self.reconnector.reconnect(session).await {
            return Err(ManagerError::Transport(first.to_string()));
        }

        op(session.handle())
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))
    }

    /// Run a snippet; remote faults and exhausted retries become failed results
    pub async fn execute(
        &self,
        session: &mut Session,
        code: &str,
    ) -> Result<ExecutionResult, ManagerError> {
        let run = self
            .with_recovery(session, |handle| {
                Box::pin(async move { handle.run_code(code).await })
            })
            .await;

        match run {
            Ok(output) => Ok(ExecutionResult::from_run(output)),
            Err(ManagerError::Transport(message)) => Ok(ExecutionResult::failure(message)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RemoteError;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn run(stdout: &[&str], results: &[&str]) -> RunOutput {
        RunOutput {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            results: results.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::stdout_wins(&["15\n"], &["42"], "15")]
    #[case::last_result_without_stdout(&[], &["1", "42"], "42")]
    #[case::placeholder_when_silent(&[], &[], SUCCESS_PLACEHOLDER)]
    fn test_output_precedence(
        #[case] stdout: &[&str],
        #[case] results: &[&str],
        #[case] expected: &str,
    ) {
        let result = ExecutionResult::from_run(run(stdout, results));
        assert!(result.success);
        assert_eq!(result.output, expected);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_remote_error_keeps_partial_output() {
        let mut output = run(&["step 1\n"], &[]);
        output.error = Some(RemoteError {
            name: "ZeroDivisionError".to_string(),
            value: "division by zero".to_string(),
            traceback: String::new(),
        });

        let result = ExecutionResult::from_run(output);
        assert_eq!(
            result,
            ExecutionResult {
                success: false,
                output: "step 1".to_string(),
                error: Some("ZeroDivisionError: division by zero".to_string()),
                results: Vec::new(),
            }
        );
    }

    #[test]
    fn test_failure_serializes_without_output_noise() {
        let json = serde_json::to_value(ExecutionResult::failure("boom")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert_eq!(json["output"], "");
    }
}
