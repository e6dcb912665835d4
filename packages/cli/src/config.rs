// ABOUTME: HTTP server configuration loaded from environment variables
// ABOUTME: Covers bind address, port and the frontend origin allowed by CORS

use std::env;
use std::num::ParseIntError;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match lookup("PORT") {
            Some(value) => value.trim().parse::<u16>()?,
            None => DEFAULT_PORT,
        };
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let frontend_url =
            lookup("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string());

        Ok(Self {
            host,
            port,
            frontend_url,
        })
    }

    /// Apply command line overrides on top of the environment
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Origins allowed by CORS, always including the local dev frontend
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_url.clone()];
        if self.frontend_url != DEFAULT_FRONTEND_URL {
            origins.push(DEFAULT_FRONTEND_URL.to_string());
        }
        origins
    }
}
