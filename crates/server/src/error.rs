//! HTTP error responses for the registry server.
//!
//! Every failure is reported as `{ "error": string }` with a status derived
//! from the core error kind.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use larder_core::Error;
use serde_json::json;

/// Error returned from a registry handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body could not be decoded as JSON.
    #[error("INVALID_SUBSCRIPTION: {0}")]
    BadBody(String),

    #[error(transparent)]
    Core(#[from] Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(Error::InvalidSubscription(_)) => StatusCode::BAD_REQUEST,
            ApiError::Core(Error::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message without the error code prefix.
    fn message(&self) -> String {
        match self {
            ApiError::BadBody(msg)
            | ApiError::Core(Error::InvalidSubscription(msg))
            | ApiError::Core(Error::Unauthorized(msg))
            | ApiError::Core(Error::RegistrationFailed(msg)) => msg.clone(),
            ApiError::Core(other) => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "registry request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "registry request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
