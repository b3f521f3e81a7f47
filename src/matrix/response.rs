//! Typed classification of homeserver responses.
//!
//! Matrix error bodies look like `{"errcode": "M_UNKNOWN_TOKEN", "error": "..."}`.
//! Classification relies on the `errcode`, never on the human-readable message.

use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

/// Error codes meaning the access token itself is unusable.
const AUTH_ERRCODES: [&str; 2] = ["M_UNKNOWN_TOKEN", "M_MISSING_TOKEN"];

/// Maximum length kept from a non-JSON error body.
const MAX_RAW_BODY_LENGTH: usize = 500;

/// Standard Matrix error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    errcode: Option<String>,
    error: Option<String>,
    retry_after_ms: Option<u64>,
}

/// A non-success answer from the homeserver.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// HTTP status code.
    pub status: u16,
    /// Matrix error code, e.g. `M_FORBIDDEN`.
    pub errcode: Option<String>,
    /// Human readable error message.
    pub error: Option<String>,
    /// Delay requested by the server for `M_LIMIT_EXCEEDED`.
    pub retry_after_ms: Option<u64>,
    /// Full response body; `{"raw": ...}` when it is not JSON.
    pub body: Value,
}

impl ServerError {
    /// Builds a [`ServerError`] from a status code and a raw response body.
    pub fn from_parts(status: u16, text: &str) -> Self {
        let body = parse_body(text);
        let parsed = serde_json::from_value::<ErrorBody>(body.clone()).ok();

        ServerError {
            status,
            errcode: parsed.as_ref().and_then(|b| b.errcode.clone()),
            error: parsed.as_ref().and_then(|b| b.error.clone()),
            retry_after_ms: parsed.and_then(|b| b.retry_after_ms),
            body,
        }
    }

    /// Checks whether the server says the access token is invalid, unknown,
    /// expired or missing.
    ///
    /// A bare `401` without any errcode is treated the same way.
    pub fn is_auth_failure(&self) -> bool {
        match self.errcode.as_deref() {
            Some(code) => AUTH_ERRCODES.contains(&code),
            None => self.status == StatusCode::UNAUTHORIZED.as_u16(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(code) = &self.errcode {
            write!(f, " {code}")?;
        }
        if let Some(message) = &self.error {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Outcome of a single HTTP exchange with the homeserver.
#[derive(Debug)]
pub enum ApiResponse {
    /// `2xx` response with its decoded body.
    Success(Value),
    /// The access token was refused.
    AuthFailure(ServerError),
    /// Any other refusal: validation, not found, forbidden, rate limited...
    RequestError(ServerError),
    /// No usable HTTP response at all.
    TransportError(reqwest::Error),
}

impl ApiResponse {
    /// Classifies a complete response.
    pub fn from_parts(status: StatusCode, text: &str) -> Self {
        if status.is_success() {
            return ApiResponse::Success(parse_body(text));
        }

        let error = ServerError::from_parts(status.as_u16(), text);
        if error.is_auth_failure() {
            ApiResponse::AuthFailure(error)
        } else {
            ApiResponse::RequestError(error)
        }
    }

    /// Reads and classifies a `reqwest` response.
    pub async fn read(response: Result<reqwest::Response, reqwest::Error>) -> Self {
        let response = match response {
            Ok(response) => response,
            Err(e) => return ApiResponse::TransportError(e),
        };

        let status = response.status();
        match response.text().await {
            Ok(text) => ApiResponse::from_parts(status, &text),
            Err(e) => ApiResponse::TransportError(e),
        }
    }
}

/// Decodes a body as JSON, an empty body as an empty object, anything else as
/// `{"raw": "<truncated text>"}`.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Default::default());
    }

    serde_json::from_str(text).unwrap_or_else(|_| {
        let raw: String = text.chars().take(MAX_RAW_BODY_LENGTH).collect();
        serde_json::json!({ "raw": raw })
    })
}
