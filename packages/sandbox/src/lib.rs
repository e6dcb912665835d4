// ABOUTME: Sandbox session manager for running code snippets in remote sandboxes
// ABOUTME: Owns session lifecycle, liveness probing, transparent reconnection and bounded retries

pub mod executor;
pub mod health;
pub mod manager;
pub mod providers;
pub mod reconnect;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use executor::{ExecutionPipeline, ExecutionResult, SUCCESS_PLACEHOLDER};
pub use health::{HealthCheck, HealthStatus, LivenessProber};
pub use manager::{ManagerError, SessionManager};
pub use providers::{
    E2BProvider, ProviderError, RemoteError, RunOutput, SandboxHandle, SandboxProvider,
};
pub use reconnect::Reconnector;
pub use session::{FileBackups, Session, SessionId, SessionInfo};
pub use settings::{SandboxSettings, SettingsError};
