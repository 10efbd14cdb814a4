use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transient failures (timeouts, connection problems, unavailable
    /// dependencies, unclassified internal errors) are retryable. Domain
    /// errors such as validation, permission and not-found are not, and
    /// neither is a circuit-open rejection.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Timeout(_)
            | CoreError::Connection(_)
            | CoreError::Unavailable(_)
            | CoreError::Internal(_)
            | CoreError::Io(_) => true,
            CoreError::Validation(_)
            | CoreError::Unauthorized(_)
            | CoreError::NotFound(_)
            | CoreError::CircuitOpen(_)
            | CoreError::AlreadyRegistered(_)
            | CoreError::Config(_)
            | CoreError::Serialization(_) => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Connection(_) => StatusCode::BAD_GATEWAY,
            CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
