//! Error types for the configuration server.

use cfgsync_protocol::CodecError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the configuration server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No route for the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials did not match.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session has not authenticated.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The session id is not open.
    #[error("unknown session: {0}")]
    UnknownSession(u64),

    /// The session limit is reached.
    #[error("too many sessions (limit {0})")]
    TooManySessions(usize),

    /// Body or frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotFound(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::UnknownSession(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::TooManySessions(_) | ServerError::Internal(_)
        )
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::NotFound(_) => 404,
            ServerError::AuthenticationFailed(_) | ServerError::NotAuthorized(_) => 401,
            ServerError::TooManySessions(_) => 503,
            ServerError::Internal(_) => 500,
            _ => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Codec(CodecError::decoding_failed("eof")).is_client_error());
    }

    #[test]
    fn error_status() {
        assert_eq!(ServerError::NotFound("/api/v2".into()).status(), 404);
        assert_eq!(ServerError::NotAuthorized("session 3".into()).status(), 401);
        assert_eq!(ServerError::TooManySessions(8).status(), 503);
        assert_eq!(ServerError::InvalidRequest("empty".into()).status(), 400);
    }

    #[test]
    fn error_display() {
        let err = ServerError::TooManySessions(16);
        assert!(err.to_string().contains("16"));
    }
}
