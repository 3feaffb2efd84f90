//! Error taxonomy for the gateway
//!
//! Every failure that can cross the gateway boundary is folded into this
//! taxonomy; backend RPC status codes are translated into it by the
//! backend adapter before they reach a handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Outward-facing errors of the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, malformed, or unverifiable credential
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Valid credential, denied by policy or blacklist
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown route, event target, or entity
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed payload or parameters
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Backend did not answer within its deadline
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Backend unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error renders as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, used in realtime error events
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "UNAUTHENTICATED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": status.as_u16(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
