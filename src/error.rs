use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Agent-wide error kinds.
///
/// Every external boundary (HTTP handler, SFTP request handler) classifies
/// whatever it catches into one of these; internal code is free to
/// propagate a `thiserror` cause through `Other`/`Runtime` unchanged.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("input invalid: {0}")]
    InputInvalid(String),

    #[error("authentication missing")]
    AuthMissing,

    #[error("authentication rejected")]
    AuthRejected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("payload too large: {0} bytes (limit {1})")]
    PayloadTooLarge(u64, u64),

    #[error("container runtime failed: {0}")]
    RuntimeFailed(String),

    #[error("stdin unavailable for this server")]
    StdinUnavailable,

    #[error("remote helper API failed: {0}")]
    RemoteFailed(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    fn status(&self) -> StatusCode {
        match self {
            AgentError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            AgentError::AuthMissing => StatusCode::BAD_REQUEST,
            AgentError::AuthRejected => StatusCode::FORBIDDEN,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::PathEscape(_) => StatusCode::FORBIDDEN,
            AgentError::PayloadTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            AgentError::RuntimeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::StdinUnavailable => StatusCode::CONFLICT,
            AgentError::RemoteFailed(_) => StatusCode::BAD_GATEWAY,
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "status": "error", "error": self.to_string() }))).into_response()
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_escape_maps_to_forbidden() {
        let err = AgentError::PathEscape("../etc/passwd".into());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn payload_too_large_maps_to_413() {
        let err = AgentError::PayloadTooLarge(3_000_000, 2_097_152);
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(err.to_string().contains("3000000"));
    }

    #[test]
    fn auth_missing_is_400_auth_rejected_is_403() {
        assert_eq!(AgentError::AuthMissing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AgentError::AuthRejected.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_displays_id() {
        let err = AgentError::NotFound("s1".into());
        assert_eq!(err.to_string(), "not found: s1");
    }
}
