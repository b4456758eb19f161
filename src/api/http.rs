//! HTTP utilities for the inventory REST API

use crate::error::ApiError;
use reqwest::Client;
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for API calls
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("regionsweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Underlying reqwest client, shared with other collaborators
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make a GET request and parse the JSON body
    pub async fn get(&self, url: &str, token: Option<&str>) -> Result<Value, ApiError> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = sanitize_for_log(&body);
            tracing::error!("API error: {} - {}", status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Format an API error for operator display without leaking response bodies
pub fn format_api_error(error: &ApiError) -> String {
    match error {
        ApiError::Status { status: 403, .. } => {
            "Permission denied. Check the permissions of the scanning identity.".to_string()
        }
        ApiError::Status { status: 401, .. } => {
            "Authentication failed. Check the configured token.".to_string()
        }
        ApiError::Status { status: 404, .. } => "Resource not found.".to_string(),
        ApiError::Status { status: 429, .. } => "Rate limit exceeded.".to_string(),
        ApiError::Status { status, .. } if *status >= 500 => {
            "Service temporarily unavailable.".to_string()
        }
        ApiError::Status { status, .. } => format!("Request failed with status {}.", status),
        ApiError::Transport(_) => {
            "Request failed. Check your network connection and endpoint.".to_string()
        }
        ApiError::Decode(_) => "Unexpected response format.".to_string(),
        ApiError::Timeout(d) => format!("Request timed out after {}s.", d.as_secs()),
        ApiError::Cancelled => "Scan cancelled.".to_string(),
    }
}
