// Error handling module
// Defines the session error taxonomy shared by the factory and the manager

use thiserror::Error;

use crate::auth::InvalidReason;

/// Errors that can occur while acquiring or using an authenticated session
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be set up, the server was unreachable,
    /// the call timed out or was cancelled
    #[error("Connection error during {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },

    /// The server rejected the credentials or the bearer token
    #[error("Authentication failed during {operation}: {message}")]
    Authentication {
        operation: &'static str,
        message: String,
    },

    /// The server answered with something we cannot interpret
    #[error("Protocol error during {operation}: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    /// Held token failed local validation. Absorbed into a refresh,
    /// never returned from the public session API.
    #[error("Token invalid: {0}")]
    TokenInvalid(InvalidReason),
}

impl SessionError {
    pub(crate) fn connection(operation: &'static str, message: impl Into<String>) -> Self {
        SessionError::Connection {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn authentication(operation: &'static str, message: impl Into<String>) -> Self {
        SessionError::Authentication {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn protocol(operation: &'static str, message: impl Into<String>) -> Self {
        SessionError::Protocol {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(operation: &'static str) -> Self {
        SessionError::connection(operation, "cancelled by caller")
    }

    /// Categorize a reqwest failure: undecodable bodies are protocol errors,
    /// everything else (connect, timeout, request) is a connection error
    pub(crate) fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SessionError::protocol(operation, format!("malformed response body: {}", err));
        }

        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else {
            "unknown"
        };

        SessionError::connection(operation, format!("{} (kind: {})", err, kind))
    }

    /// Whether retrying later without operator intervention may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Connection { .. })
    }

    /// Name of the operation that failed
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            SessionError::Connection { operation, .. }
            | SessionError::Authentication { operation, .. }
            | SessionError::Protocol { operation, .. } => Some(operation),
            SessionError::TokenInvalid(_) => None,
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SessionError::connection("session create", "connection refused");
        assert_eq!(
            err.to_string(),
            "Connection error during session create: connection refused"
        );

        let err = SessionError::authentication("session create", "invalid username or password");
        assert_eq!(
            err.to_string(),
            "Authentication failed during session create: invalid username or password"
        );

        let err = SessionError::protocol("user info", "missing field `loggedIn`");
        assert_eq!(
            err.to_string(),
            "Protocol error during user info: missing field `loggedIn`"
        );

        let err = SessionError::TokenInvalid(InvalidReason::Expired);
        assert_eq!(err.to_string(), "Token invalid: expired");
    }

    #[test]
    fn test_cancelled_is_connection_error() {
        let err = SessionError::cancelled("session create");
        assert!(matches!(err, SessionError::Connection { .. }));
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_is_transient() {
        assert!(SessionError::connection("x", "down").is_transient());
        assert!(!SessionError::authentication("x", "bad password").is_transient());
        assert!(!SessionError::protocol("x", "garbage").is_transient());
        assert!(!SessionError::TokenInvalid(InvalidReason::Malformed).is_transient());
    }

    #[test]
    fn test_operation() {
        assert_eq!(
            SessionError::authentication("session create", "nope").operation(),
            Some("session create")
        );
        assert_eq!(SessionError::TokenInvalid(InvalidReason::Empty).operation(), None);
    }
}
