use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

/// Errors returned by the coordination engine and its store adapters.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("attendee {attendee_id} already has open emergency {emergency_id}")]
    AlreadyActive {
        attendee_id: String,
        emergency_id: String,
    },

    #[error("invalid transition: {event} from {from}")]
    InvalidTransition { from: String, event: String },

    #[error("emergency {0} is resolved")]
    IncidentClosed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Permanent failure such as a stored document that no longer decodes.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordError {
    /// Only connectivity failures are worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, CoordError::UpstreamUnavailable(_))
    }

    pub const fn code(&self) -> i32 {
        match self {
            CoordError::AlreadyActive { .. } => error_codes::ALREADY_ACTIVE,
            CoordError::InvalidTransition { .. } => error_codes::INVALID_TRANSITION,
            CoordError::IncidentClosed(_) => error_codes::INCIDENT_CLOSED,
            CoordError::NotFound(_) => error_codes::NOT_FOUND,
            CoordError::UpstreamUnavailable(_) => error_codes::UPSTREAM_UNAVAILABLE,
            CoordError::Validation(_) => error_codes::VALIDATION_ERROR,
            CoordError::Forbidden(_) => error_codes::PERMISSION_DENIED,
            CoordError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            CoordError::AlreadyActive { .. } | CoordError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            CoordError::IncidentClosed(_) => StatusCode::GONE,
            CoordError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoordError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for CoordError {
    fn from(e: redis::RedisError) -> Self {
        CoordError::UpstreamUnavailable(format!("redis: {e}"))
    }
}

impl From<sqlx::Error> for CoordError {
    fn from(e: sqlx::Error) -> Self {
        CoordError::UpstreamUnavailable(format!("postgres: {e}"))
    }
}

impl From<reqwest::Error> for CoordError {
    fn from(e: reqwest::Error) -> Self {
        CoordError::UpstreamUnavailable(format!("http: {e}"))
    }
}

// Only raised when a stored document fails to encode or decode.
impl From<serde_json::Error> for CoordError {
    fn from(e: serde_json::Error) -> Self {
        CoordError::Internal(format!("corrupt document: {e}"))
    }
}

/// HTTP-facing error.
#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    Coord(CoordError),
}

impl From<CoordError> for AppError {
    fn from(e: CoordError) -> Self {
        AppError::Coord(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "unauthorized".to_string(),
            ),
            AppError::Coord(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, "upstream failure surfaced to client");
                }
                (e.status(), e.code(), e.to_string())
            }
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_is_distinct_from_domain_failures() {
        let upstream = CoordError::UpstreamUnavailable("down".into());
        let closed = CoordError::IncidentClosed("e1".into());
        assert!(upstream.is_retryable());
        assert!(!closed.is_retryable());
        assert_ne!(upstream.code(), closed.code());
        assert_eq!(upstream.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(closed.status(), StatusCode::GONE);
    }

    #[test]
    fn corrupt_document_is_not_retryable() {
        let decode = serde_json::from_str::<crate::models::Emergency>("{").unwrap_err();
        let err = CoordError::from(decode);
        assert!(matches!(err, CoordError::Internal(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), error_codes::INTERNAL_ERROR);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let resp = AppError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
