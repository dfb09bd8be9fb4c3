use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Failures of a single backend call. `Display` is the banner text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Transport(String),

    /// Non-success HTTP status, with the backend's message when it sent one.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// A success status whose body still carried an `error` field.
    #[error("{0}")]
    Backend(String),

    /// The body could not be read or did not match the expected shape.
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl ApiError {
    /// Build an error for a non-success response body.
    ///
    /// Prefers the `error` field, then `detail`, then a status-based message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .as_ref()
            .and_then(message_field)
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        Self::Status { status, message }
    }

    /// HTTP status, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn message_field(value: &Value) -> Option<String> {
    ["error", "detail"].into_iter().find_map(|key| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|msg| !msg.is_empty())
            .map(str::to_string)
    })
}

/// Decode a 2xx body, treating `{"error": "..."}` as a failure.
pub(super) fn decode_success<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, ApiError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ApiError::Decode {
        endpoint,
        reason: e.to_string(),
    })?;

    if let Some(message) = value.get("error").and_then(Value::as_str).filter(|m| !m.is_empty()) {
        return Err(ApiError::Backend(message.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ApiError::Decode {
        endpoint,
        reason: e.to_string(),
    })
}
