// ABOUTME: Sandbox settings loaded from environment variables
// ABOUTME: Covers E2B endpoints, sandbox lifetime, upload location and bootstrap snippets

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Snippet run on every freshly provisioned sandbox to install and import the
/// baseline data stack. Safe to run more than once.
pub const DEFAULT_BOOTSTRAP_CODE: &str = r#"
import subprocess
subprocess.run(['pip', 'install', 'pandas', 'openpyxl', 'xlrd', 'matplotlib'], capture_output=True)
import pandas as pd
import matplotlib
matplotlib.use('Agg')
print("Dependencies ready!")
"#;

/// Minimal side-effect-free snippet used for liveness probes
pub const DEFAULT_PROBE_CODE: &str = "print('ok')";

const DEFAULT_API_URL: &str = "https://api.e2b.dev";
const DEFAULT_DOMAIN: &str = "e2b.app";
const DEFAULT_TEMPLATE: &str = "code-interpreter-v1";
const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_UPLOAD_DIR: &str = "/home/user";

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Upload directory must be an absolute path: {0}")]
    RelativeUploadDir(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// E2B API key; only required by the E2B provider
    #[serde(skip_serializing)]
    pub api_key: String,
    pub api_url: String,
    pub domain: String,
    pub template: String,
    /// Lifetime requested for every provisioned sandbox
    pub sandbox_timeout: Duration,
    /// Per-request timeout for calls to the provider
    pub request_timeout: Duration,
    /// Routes all in-sandbox traffic through one base URL instead of the
    /// per-sandbox hostnames
    pub sandbox_base_url: Option<String>,
    pub upload_dir: String,
    pub bootstrap_code: String,
    pub probe_code: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            sandbox_timeout: Duration::from_secs(DEFAULT_SANDBOX_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sandbox_base_url: None,
            upload_dir: DEFAULT_UPLOAD_DIR.to_string(),
            bootstrap_code: DEFAULT_BOOTSTRAP_CODE.to_string(),
            probe_code: DEFAULT_PROBE_CODE.to_string(),
        }
    }
}

impl SandboxSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sandbox_timeout = parse_secs(
            "E2B_SANDBOX_TIMEOUT",
            non_empty("E2B_SANDBOX_TIMEOUT"),
            DEFAULT_SANDBOX_TIMEOUT_SECS,
        )?;
        let request_timeout = parse_secs(
            "E2B_REQUEST_TIMEOUT",
            non_empty("E2B_REQUEST_TIMEOUT"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let upload_dir = non_empty("SANDBOX_UPLOAD_DIR")
            .map(|dir| normalize_dir(&dir))
            .unwrap_or(defaults.upload_dir);
        if !upload_dir.starts_with('/') {
            return Err(SettingsError::RelativeUploadDir(upload_dir));
        }

        Ok(Self {
            api_key: non_empty("E2B_API_KEY").unwrap_or_default(),
            api_url: non_empty("E2B_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            domain: non_empty("E2B_DOMAIN").unwrap_or(defaults.domain),
            template: non_empty("E2B_TEMPLATE").unwrap_or(defaults.template),
            sandbox_timeout,
            request_timeout,
            sandbox_base_url: non_empty("E2B_SANDBOX_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            upload_dir,
            bootstrap_code: defaults.bootstrap_code,
            probe_code: defaults.probe_code,
        })
    }

    /// Remote path an uploaded file with this name is written to
    pub fn upload_path(&self, filename: &str) -> String {
        format!("{}/{}", self.upload_dir.trim_end_matches('/'), filename)
    }
}

/// Drop trailing slashes, keeping the filesystem root intact
fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim().trim_end_matches('/');
    if trimmed.is_empty() && dir.trim().starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_secs(
    key: &'static str,
    raw: Option<String>,
    default: u64,
) -> Result<Duration, SettingsError> {
    let secs = match raw {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| SettingsError::InvalidNumber { key, value })?,
        None => default,
    };

    if secs == 0 {
        return Err(SettingsError::ZeroDuration(key));
    }

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = SandboxSettings::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(settings.api_url, "https://api.e2b.dev");
        assert_eq!(settings.domain, "e2b.app");
        assert_eq!(settings.template, "code-interpreter-v1");
        assert_eq!(settings.sandbox_timeout, Duration::from_secs(1800));
        assert_eq!(settings.upload_dir, "/home/user");
        assert!(settings.sandbox_base_url.is_none());
        assert!(settings.api_key.is_empty());
    }

    #[test]
    fn test_custom_values() {
        let settings = SandboxSettings::from_lookup(lookup_from(&[
            ("E2B_API_KEY", "e2b_test"),
            ("E2B_SANDBOX_TIMEOUT", "600"),
            ("E2B_API_URL", "http://localhost:9000/"),
            ("SANDBOX_UPLOAD_DIR", "/data/"),
        ]))
        .unwrap();

        assert_eq!(settings.api_key, "e2b_test");
        assert_eq!(settings.sandbox_timeout, Duration::from_secs(600));
        assert_eq!(settings.api_url, "http://localhost:9000");
        assert_eq!(settings.upload_path("a.csv"), "/data/a.csv");
    }

    #[test]
    fn test_invalid_timeout() {
        let err = SandboxSettings::from_lookup(lookup_from(&[("E2B_SANDBOX_TIMEOUT", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidNumber {
                key: "E2B_SANDBOX_TIMEOUT",
                value: "soon".to_string()
            }
        );

        let err = SandboxSettings::from_lookup(lookup_from(&[("E2B_REQUEST_TIMEOUT", "0")]))
            .unwrap_err();
        assert_eq!(err, SettingsError::ZeroDuration("E2B_REQUEST_TIMEOUT"));
    }

    #[test]
    fn test_relative_upload_dir_rejected() {
        let err = SandboxSettings::from_lookup(lookup_from(&[("SANDBOX_UPLOAD_DIR", "uploads")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::RelativeUploadDir(_)));
    }

    #[test]
    fn test_root_upload_dir_is_kept() {
        let settings =
            SandboxSettings::from_lookup(lookup_from(&[("SANDBOX_UPLOAD_DIR", "/")])).unwrap();
        assert_eq!(settings.upload_dir, "/");
        assert_eq!(settings.upload_path("a.csv"), "/a.csv");
    }
}
