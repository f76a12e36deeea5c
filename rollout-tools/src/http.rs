//! HTTP health client
//!
//! Checks the application's health endpoint from outside the cluster. The
//! application answers `GET /health` with
//! `{"status": "healthy", "timestamp": ..., "version": ..., "uptime": ...}`.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};

/// Body returned by the application's health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// HTTP client for an application's health endpoint
#[derive(Debug, Clone)]
pub struct HealthClient {
    /// Base URL of the application (e.g., "https://demo.example.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl HealthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a health client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a path, tolerating a missing leading slash
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Fetches the health endpoint
    ///
    /// Non-2xx responses are `Unavailable`; the caller decides whether the
    /// returned body counts as healthy.
    pub async fn check(&self, path: &str) -> Result<HealthResponse> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ToolError::Unavailable(format!(
                "health check returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let text = response.text().await?;
        parse_health_response(&text)
    }
}

pub fn parse_health_response(body: &str) -> Result<HealthResponse> {
    serde_json::from_str(body).map_err(|e| ToolError::Unavailable(format!(
        "health endpoint returned an unexpected body: {}",
        e
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HealthClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/health"), "http://localhost:8000/health");
        assert_eq!(client.url("health"), "http://localhost:8000/health");
    }

    #[test]
    fn test_parse_healthy_body() {
        let body = r#"{"status": "healthy", "timestamp": "2024-01-01T00:00:00", "version": "1.0.0", "uptime": 12.5}"#;
        let health = parse_health_response(body).unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_parse_degraded_body() {
        let health = parse_health_response(r#"{"status": "degraded"}"#).unwrap();
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_unexpected_body_is_transient() {
        let err = parse_health_response("<html>502</html>").unwrap_err();
        assert!(!err.is_fatal());
    }
}
