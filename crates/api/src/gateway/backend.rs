//! Execution backend clients
//!
//! A backend takes a rendered prompt and a target descriptor and returns
//! output plus reported work-unit usage. Failures are classified so the
//! gateway can decide whether the next target in the chain is worth trying.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tollgate_shared::ExecutionTarget;

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Target rejected the request with status {0}")]
    Status(u16),

    #[error("Invalid response from target: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Returns true if the next target in the fallback chain should be tried
    pub fn is_transient(&self) -> bool {
        match self {
            // Retry network-level failures and overload signals
            BackendError::Timeout => true,
            BackendError::Connect(_) => true,
            BackendError::Status(status) => *status == 429 || *status >= 500,

            // Don't retry permanent errors
            BackendError::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Connect(err.to_string())
        } else {
            BackendError::Protocol(err.to_string())
        }
    }
}

/// Successful backend response
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub output: String,
    /// Reported usage in backend work units; absent when the target does
    /// not report usage
    pub work_units: Option<i64>,
}

/// One inference call against one target
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn invoke(
        &self,
        target: &ExecutionTarget,
        prompt: &str,
    ) -> Result<BackendResponse, BackendError>;
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    output: String,
    #[serde(default)]
    work_units: Option<i64>,
}

/// HTTP backend client with a bounded per-call timeout
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    #[allow(clippy::expect_used)] // HTTP client creation failure is a fatal system error
    pub fn new(timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn invoke(
        &self,
        target: &ExecutionTarget,
        prompt: &str,
    ) -> Result<BackendResponse, BackendError> {
        let response = self
            .client
            .post(&target.endpoint)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let payload: WirePayload = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(BackendResponse {
            output: payload.output,
            work_units: payload.work_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Connect("refused".into()).is_transient());
        assert!(BackendError::Status(429).is_transient());
        assert!(BackendError::Status(500).is_transient());
        assert!(BackendError::Status(503).is_transient());

        assert!(!BackendError::Status(400).is_transient());
        assert!(!BackendError::Status(404).is_transient());
        assert!(!BackendError::Protocol("bad json".into()).is_transient());
    }
}
