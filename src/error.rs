//! Error taxonomy for the temperature core and its HTTP binding.
//!
//! Every rejection carries a kind and a human-readable reason. Validation
//! kinds are produced before the reading store is touched; only
//! `StorageUnavailable` originates from the store itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

// ---

#[derive(Error, Debug)]
pub enum CoreError {
    // ---
    /// Explicit start/end could not be parsed, or does not form an interval.
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),

    /// Location name is not in the device registry.
    #[error("unknown location: {0}")]
    UnknownLocation(String),

    /// Shared ingest secret missing or mismatched.
    #[error("unauthorized ingest: {0}")]
    UnauthorizedIngest(String),

    /// Ingest body is missing fields or has the wrong types.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Drill-down label/location could not be turned into a window.
    #[error("invalid drill-down request: {0}")]
    InvalidDrilldownRequest(String),

    /// The reading store failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),
}

impl CoreError {
    // ---
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidDateFormat(_) => "InvalidDateFormat",
            CoreError::UnknownLocation(_) => "UnknownLocation",
            CoreError::UnauthorizedIngest(_) => "UnauthorizedIngest",
            CoreError::InvalidPayload(_) => "InvalidPayload",
            CoreError::InvalidDrilldownRequest(_) => "InvalidDrilldownRequest",
            CoreError::StorageUnavailable(_) => "StorageUnavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::UnauthorizedIngest(_) => StatusCode::UNAUTHORIZED,
            CoreError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                kind = self.kind(),
                error = %self,
                "request failed"
            );
        } else {
            tracing::warn!(
                request_id = %request_id,
                kind = self.kind(),
                error = %self,
                "request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_status_mapping() {
        // ---
        assert_eq!(
            CoreError::UnauthorizedIngest("missing".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            CoreError::UnknownLocation("attic".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CoreError::StorageUnavailable(sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_names_the_offending_value() {
        // ---
        let err = CoreError::UnknownLocation("attic".into());
        assert_eq!(err.kind(), "UnknownLocation");
        assert_eq!(err.to_string(), "unknown location: attic");
    }
}
