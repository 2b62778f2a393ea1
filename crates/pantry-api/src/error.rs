//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same JSON error body and maps
//! [`PantryError`] onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pantry_core::error::PantryError;
use serde::{Deserialize, Serialize};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "invalid_query").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or blank query text.
    InvalidQuery(String),
    /// 422 - the ingest body is not a recognizable batch.
    UnprocessableEntity(String),
    /// 503 - the server is shutting down and abandoned the request.
    Cancelled,
    /// 500 - unexpected server error.
    Internal(String),
    /// 502 - the embedding provider failed, including timeouts.
    BadGateway(String),
    /// 503 - the vector index is unavailable or stalled.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, "invalid_query", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "malformed_record", msg)
            }
            ApiError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "cancelled",
                "request cancelled".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "embedding_unavailable", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", msg)
            }
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = error_code, %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<PantryError> for ApiError {
    fn from(err: PantryError) -> Self {
        match err {
            PantryError::InvalidQuery(msg) => ApiError::InvalidQuery(msg),
            PantryError::MalformedRecord(msg) => ApiError::UnprocessableEntity(msg),
            PantryError::EmbeddingService(msg) => ApiError::BadGateway(msg),
            PantryError::IndexUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            PantryError::Cancelled => ApiError::Cancelled,
            err => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: PantryError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(PantryError::InvalidQuery("blank".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(PantryError::MalformedRecord("scalar".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(PantryError::EmbeddingService("down".into())),
            StatusCode::BAD_GATEWAY
        );
        // The clients attribute timeouts; one that escapes them is a bug.
        assert_eq!(
            status_of(PantryError::Timeout {
                operation: "embed".into(),
                timeout_ms: 10
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(PantryError::IndexUnavailable("gone".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PantryError::DimensionMismatch {
                expected: 384,
                actual: 768
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
