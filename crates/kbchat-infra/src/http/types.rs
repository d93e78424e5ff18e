//! Wire types for the knowledge-base back-end API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kbchat_types::error::ApiError;

/// SSE payload that terminates a reply stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Body of `POST /api/chat/sessions/{id}/messages`.
#[derive(Debug, Serialize)]
pub struct SendMessageBody<'a> {
    pub content: &'a str,
}

/// Error body in the back-end's `{"detail": ...}` shape.
///
/// `detail` is a string for application errors and a list of objects for
/// request validation failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Component name to status (`"healthy"` / `"unhealthy"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthReport {
    pub components: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.components.values().all(|status| status == "healthy")
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &str> {
        self.components
            .iter()
            .filter(|(_, status)| status.as_str() != "healthy")
            .map(|(name, _)| name.as_str())
    }
}

/// Map a non-success response to an [`ApiError`].
pub fn error_from_status(status: u16, body: &str) -> ApiError {
    if status == 404 {
        return ApiError::NotFound;
    }

    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    };
    ApiError::Status { status, message }
}

/// Map a transport failure to an [`ApiError`].
pub fn error_from_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}
