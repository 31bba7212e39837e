//! HTTP utilities for Azure Resource Manager REST calls

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Upper bound on a single request, matching the management SDK default
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Header correlating a request with resource-manager service logs
const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Categorized failure of a single read against the management API
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CloudError {
    #[error("resource not found ({code})")]
    NotFound { code: String },

    #[error("authentication rejected ({code})")]
    Unauthorized { code: String },

    #[error("permission denied ({code})")]
    Forbidden { code: String },

    #[error("request throttled")]
    Throttled { retry_after: Option<u64> },

    #[error("service error {status} ({code})")]
    Server { status: u16, code: String },

    #[error("request failed with status {status} ({code})")]
    Http { status: u16, code: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    /// Short category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            CloudError::NotFound { .. } => "not_found",
            CloudError::Unauthorized { .. } => "unauthorized",
            CloudError::Forbidden { .. } => "forbidden",
            CloudError::Throttled { .. } => "throttled",
            CloudError::Server { .. } => "server",
            CloudError::Http { .. } => "http",
            CloudError::Transport(_) => "transport",
            CloudError::Decode(_) => "decode",
            CloudError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Map a non-success status and its body to a category
    pub fn from_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> Self {
        let code = error_code(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown")
                .replace(' ', "")
        });

        match status {
            StatusCode::NOT_FOUND => CloudError::NotFound { code },
            StatusCode::UNAUTHORIZED => CloudError::Unauthorized { code },
            StatusCode::FORBIDDEN => CloudError::Forbidden { code },
            StatusCode::TOO_MANY_REQUESTS => CloudError::Throttled { retry_after },
            s if s.is_server_error() => CloudError::Server {
                status: s.as_u16(),
                code,
            },
            s => CloudError::Http {
                status: s.as_u16(),
                code,
            },
        }
    }
}

/// Extract `error.code` from a resource-manager error body
fn error_code(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut cut = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for resource-manager calls
#[derive(Clone)]
pub struct ArmHttpClient {
    client: Client,
}

impl ArmHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("rmfacts/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Make an authenticated GET request and parse the JSON body
    pub async fn get(&self, url: &Url, token: &str) -> Result<Value, CloudError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("GET {} [{}]", url, request_id);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID, &request_id)
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| CloudError::Transport(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            // Only the sanitized, truncated body reaches the log
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(CloudError::from_status(status, &body, retry_after));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| CloudError::Decode(e.to_string()))
    }
}
