//! External service clients.
//!
//! This module contains:
//! - `FactStore` trait and HTTP implementation: filtered queries over
//!   previously stored submissions
//! - `Directory` trait and HTTP implementation: user/team resolution
//! - Mock implementations for testing

use std::time::Duration;

use backon::ExponentialBuilder;

pub mod directory;
pub mod facts;
pub mod mock;

pub use directory::{Directory, HttpDirectory, OrganizationRef, Team, User};
pub use facts::{FactQuery, FactStore, HttpFactStore, StoredFact};
pub use mock::{MockDirectory, MockFactStore};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur calling external services.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the error is transient and worth retrying.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            // Retry timeouts and connection errors
            ClientError::Http(err) => err.is_timeout() || err.is_connect(),
            // Retry 429 (rate limit) and 5xx (server errors)
            ClientError::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

/// Connection settings for an HTTP service client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Service base URL, without trailing slash.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("base URL not configured".to_string()));
        }
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }
}

/// Backoff configuration for transient client failures.
pub(crate) fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(5)
        .with_jitter()
}
