// ABOUTME: Provider and handle traits for remote code-execution sandboxes
// ABOUTME: Defines the abstract interface the session manager provisions, drives and releases

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod e2b;

pub use e2b::E2BProvider;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Provisioning error: {0}")]
    ProvisioningError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Error reported by the remote runtime for the submitted code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.value)
        }
    }
}

/// Everything a single remote run produced
///
/// `error` and the output channels are independent: a run that faults
/// midway still reports whatever it printed before the fault.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub error: Option<RemoteError>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Text form of explicit result values, last evaluated expression last
    pub results: Vec<String>,
}

impl RunOutput {
    /// Captured standard output as one string, without the trailing newline
    pub fn stdout_text(&self) -> String {
        self.stdout.concat().trim_end_matches('\n').to_string()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A provisioned remote sandbox
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Provider-assigned sandbox identifier
    fn id(&self) -> &str;

    /// Run a code snippet and collect its output
    ///
    /// `Err` means the call to the sandbox itself failed. Faults raised by the
    /// submitted code come back as `Ok` with `RunOutput::error` set.
    async fn run_code(&self, code: &str) -> Result<RunOutput>;

    /// Write raw bytes to a path on the sandbox filesystem
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Tear down the remote sandbox. Failures are logged, never returned.
    async fn release(&self);
}

/// Service that allocates new sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    /// Provision a fresh sandbox that stays alive for at most `timeout`
    async fn provision(&self, timeout: Duration) -> Result<Arc<dyn SandboxHandle>>;
}
