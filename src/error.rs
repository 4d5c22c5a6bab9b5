use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::session::SessionId;

/// The crate's error type.
#[derive(Error, Debug)]
pub enum SecurityError {
    /// No session exists for an id where one was required.
    #[error("There is no session with id [{0}]")]
    UnknownSession(SessionId),

    /// The session was explicitly stopped.
    #[error("Session with id [{0}] has been explicitly stopped")]
    StoppedSession(SessionId),

    /// The session idled past its timeout.
    #[error("Session with id [{0}] has expired")]
    ExpiredSession(SessionId),

    /// A session record was written before an id was assigned to it.
    #[error("Session record has no id")]
    MissingSessionId,

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A listener callback failed.
    #[error("Listener error: {0}")]
    Listener(String),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `SecurityError` as the error type.
pub type Result<T> = std::result::Result<T, SecurityError>;

impl SecurityError {
    /// Returns `true` for the invalid-session family: unknown, stopped and expired sessions.
    pub fn is_invalid_session(&self) -> bool {
        matches!(
            self,
            SecurityError::UnknownSession(_)
                | SecurityError::StoppedSession(_)
                | SecurityError::ExpiredSession(_)
        )
    }

    /// The id of the offending session, if this error carries one.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SecurityError::UnknownSession(id)
            | SecurityError::StoppedSession(id)
            | SecurityError::ExpiredSession(id) => Some(*id),
            _ => None,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SecurityError::UnknownSession(ref id) => {
                tracing::debug!("Unknown session: {}", id);
                (StatusCode::UNAUTHORIZED, "Session not found".to_string())
            }

            SecurityError::StoppedSession(ref id) => {
                tracing::debug!("Stopped session: {}", id);
                (StatusCode::UNAUTHORIZED, "Session has been stopped".to_string())
            }

            SecurityError::ExpiredSession(ref id) => {
                tracing::debug!("Expired session: {}", id);
                (StatusCode::UNAUTHORIZED, "Session has expired".to_string())
            }

            SecurityError::MissingSessionId => {
                tracing::error!("Session record has no id");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            SecurityError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            SecurityError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            SecurityError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".to_string())
            }

            SecurityError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            SecurityError::Listener(ref msg) => {
                tracing::error!("Listener error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            SecurityError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}
