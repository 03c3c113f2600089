//! Error types and JSON error responses for the admin API

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Failure talking to the Caddy admin endpoint
#[derive(Debug, Error)]
pub enum ControlError {
    /// Transport failure or request could not be built
    #[error("failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    /// Caddy answered with something other than 200
    #[error("caddy returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not valid JSON
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure of a host administration operation
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Inbound host is missing required fields; nothing was written
    #[error("{0}")]
    Validation(String),

    #[error("Proxy host not found: {0}")]
    NotFound(i64),

    #[error("Remote server not found: {0}")]
    ServerNotFound(String),

    /// Persistence failure; no document was pushed
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The store was updated but Caddy did not accept the new document
    #[error("Failed to reload Caddy: {0}")]
    Push(#[from] ControlError),
}

impl ServiceError {
    pub fn code(&self) -> ApiErrorCode {
        match self {
            ServiceError::Validation(_) => ApiErrorCode::ValidationFailed,
            ServiceError::NotFound(_) | ServiceError::ServerNotFound(_) => ApiErrorCode::NotFound,
            ServiceError::Store(_) => ApiErrorCode::StoreError,
            ServiceError::Push(_) => ApiErrorCode::ReloadFailed,
        }
    }

    pub fn to_response(&self) -> Response<Full<Bytes>> {
        json_error_response(self.code(), self.to_string())
    }
}

/// Error codes returned by the admin API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    /// Request body or path parameter could not be parsed
    BadRequest,
    /// Host failed validation
    ValidationFailed,
    /// Missing or invalid credentials
    Unauthorized,
    /// Unknown host or route
    NotFound,
    /// Backing store failed
    StoreError,
    /// Caddy rejected or did not receive the configuration
    ReloadFailed,
    /// Anything else
    InternalError,
}

impl ApiErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorCode::ReloadFailed => StatusCode::BAD_GATEWAY,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the X-Api-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ApiErrorCode::BadRequest => "BAD_REQUEST",
            ApiErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ApiErrorCode::Unauthorized => "UNAUTHORIZED",
            ApiErrorCode::NotFound => "NOT_FOUND",
            ApiErrorCode::StoreError => "STORE_ERROR",
            ApiErrorCode::ReloadFailed => "RELOAD_FAILED",
            ApiErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error body, shaped like the success envelope
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: ApiErrorCode,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"success":false,"code":"{}","error":"{}"}}"#,
                self.code.as_header_value(),
                self.error.replace('\"', "\\\"")
            )
        })
    }
}

/// Create a JSON error response with X-Api-Error header
pub fn json_error_response(code: ApiErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let body = ErrorResponse::new(code, message).to_json();

    Response::builder()
        .status(code.status_code())
        .header(CONTENT_TYPE, "application/json")
        .header("X-Api-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)))
        .expect("valid response with StatusCode enum and static headers")
}
