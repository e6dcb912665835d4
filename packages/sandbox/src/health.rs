// ABOUTME: Liveness probing for session sandboxes
// ABOUTME: Runs a trivial snippet and classifies the sandbox as healthy or unreachable

use crate::providers::SandboxHandle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    /// The sandbox answered but the probe snippet itself failed
    Faulted,
    /// The call never reached a working sandbox
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub sandbox_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub response_time_ms: u64,
}

impl HealthCheck {
    pub fn is_alive(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Decides whether a sandbox is still responsive with one round trip
#[derive(Debug, Clone)]
pub struct LivenessProber {
    probe_code: String,
}

impl LivenessProber {
    pub fn new(probe_code: impl Into<String>) -> Self {
        Self {
            probe_code: probe_code.into(),
        }
    }

    /// Probe the sandbox and describe the outcome. Never fails.
    pub async fn check(&self, handle: &dyn SandboxHandle) -> HealthCheck {
        let start = Instant::now();
        let result = handle.run_code(&self.probe_code).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(output) => match output.error {
                None => (HealthStatus::Healthy, None),
                Some(error) => (HealthStatus::Faulted, Some(error.to_string())),
            },
            Err(e) => (HealthStatus::Unreachable, Some(e.to_string())),
        };

        if status == HealthStatus::Healthy {
            debug!(
                "Sandbox {} healthy ({}ms)",
                handle.id(),
                response_time_ms
            );
        } else {
            warn!(
                "Sandbox {} failed liveness probe: {:?} {}",
                handle.id(),
                status,
                message.as_deref().unwrap_or("")
            );
        }

        HealthCheck {
            sandbox_id: handle.id().to_string(),
            timestamp: Utc::now(),
            status,
            message,
            response_time_ms,
        }
    }

    /// True iff the probe completed without a remote error
    pub async fn is_alive(&self, handle: &dyn SandboxHandle) -> bool {
        self.check(handle).await.is_alive()
    }
}
