// ABOUTME: E2B provider for remote code-interpreter sandboxes
// ABOUTME: Provisions sandboxes over the E2B REST API and drives code runs and file writes

use super::{ProviderError, Result, RemoteError, RunOutput, SandboxHandle, SandboxProvider};
use crate::settings::SandboxSettings;
use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CODE_INTERPRETER_PORT: u16 = 49999;
const ENVD_PORT: u16 = 49983;
const SANDBOX_USER: &str = "user";

#[derive(Serialize)]
struct CreateSandboxBody<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "envdAccessToken", default)]
    envd_access_token: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    code: &'a str,
}

/// One line of the code interpreter's streamed response
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecutionEvent {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Result {
        #[serde(default)]
        text: Option<String>,
    },
    Error {
        name: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        traceback: String,
    },
    #[serde(other)]
    Other,
}

/// E2B provider for code-interpreter sandboxes
pub struct E2BProvider {
    client: Client,
    api_key: String,
    api_url: String,
    domain: String,
    template: String,
    sandbox_base_url: Option<String>,
}

impl E2BProvider {
    /// Create a new E2B provider from sandbox settings
    pub fn new(settings: &SandboxSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(ProviderError::ConfigError(
                "E2B API key is required (set E2B_API_KEY)".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            api_url: settings.api_url.clone(),
            domain: settings.domain.clone(),
            template: settings.template.clone(),
            sandbox_base_url: settings.sandbox_base_url.clone(),
        })
    }

    fn sandbox_url(&self, sandbox_id: &str, domain: &str, port: u16) -> String {
        match &self.sandbox_base_url {
            Some(base) => base.clone(),
            None => format!("https://{}-{}.{}", port, sandbox_id, domain),
        }
    }
}

#[async_trait]
impl SandboxProvider for E2BProvider {
    fn name(&self) -> &str {
        "e2b"
    }

    async fn provision(&self, timeout: Duration) -> Result<Arc<dyn SandboxHandle>> {
        let body = CreateSandboxBody {
            template_id: &self.template,
            timeout: timeout.as_secs(),
        };

        let response = self
            .client
            .post(format!("{}/sandboxes", self.api_url))
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::ProvisioningError(format!(
                "E2B returned {}: {}",
                status, detail
            )));
        }

        let created: CreatedSandbox = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let domain = created.domain.as_deref().unwrap_or(&self.domain);
        info!(
            "Provisioned E2B sandbox {} (template {})",
            created.sandbox_id, self.template
        );

        Ok(Arc::new(E2BSandbox {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            execute_url: format!(
                "{}/execute",
                self.sandbox_url(&created.sandbox_id, domain, CODE_INTERPRETER_PORT)
            ),
            files_url: format!(
                "{}/files",
                self.sandbox_url(&created.sandbox_id, domain, ENVD_PORT)
            ),
            sandbox_id: created.sandbox_id,
            access_token: created.envd_access_token,
        }))
    }
}

/// Handle to one running E2B sandbox
pub struct E2BSandbox {
    client: Client,
    api_url: String,
    api_key: String,
    sandbox_id: String,
    access_token: Option<String>,
    execute_url: String,
    files_url: String,
}

impl E2BSandbox {
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }
}

#[async_trait]
impl SandboxHandle for E2BSandbox {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_code(&self, code: &str) -> Result<RunOutput> {
        debug!("Running {} bytes of code in {}", code.len(), self.sandbox_id);

        let response = self
            .authorize(self.client.post(&self.execute_url))
            .json(&ExecuteBody { code })
            .send()
            .await
            .map_err(|e| ProviderError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::TransportError(format!(
                "Sandbox {} returned {}: {}",
                self.sandbox_id, status, detail
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::TransportError(e.to_string()))?;

        parse_execution_stream(&body)
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(content.to_vec()).file_name(file_name),
        );

        let response = self
            .authorize(self.client.post(&self.files_url))
            .query(&[("path", path), ("username", SANDBOX_USER)])
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::TransportError(format!(
                "Writing {} to sandbox {} failed with {}: {}",
                path, self.sandbox_id, status, detail
            )));
        }

        debug!(
            "Wrote {} bytes to {} in {}",
            content.len(),
            path,
            self.sandbox_id
        );
        Ok(())
    }

    async fn release(&self) {
        let result = self
            .client
            .delete(format!("{}/sandboxes/{}", self.api_url, self.sandbox_id))
            .header("X-API-KEY", &self.api_key)
            .send()
            .await;

        match result {
            Ok(response)
                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND =>
            {
                info!("Released E2B sandbox {}", self.sandbox_id);
            }
            Ok(response) => warn!(
                "Failed to release E2B sandbox {}: status {}",
                self.sandbox_id,
                response.status()
            ),
            Err(e) => warn!("Failed to release E2B sandbox {}: {}", self.sandbox_id, e),
        }
    }
}

/// Fold the newline-delimited event stream into a single run output
fn parse_execution_stream(body: &str) -> Result<RunOutput> {
    let mut output = RunOutput::default();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: ExecutionEvent = serde_json::from_str(line)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", e, line)))?;

        match event {
            ExecutionEvent::Stdout { text } => output.stdout.push(text),
            ExecutionEvent::Stderr { text } => output.stderr.push(text),
            ExecutionEvent::Result { text: Some(text) } => output.results.push(text),
            ExecutionEvent::Result { text: None } => {}
            ExecutionEvent::Error {
                name,
                value,
                traceback,
            } => {
                output.error = Some(RemoteError {
                    name,
                    value,
                    traceback,
                })
            }
            ExecutionEvent::Other => {}
        }
    }

    Ok(output)
}
