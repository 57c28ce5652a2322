//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: failures of the HTTP surface, converted into JSON responses
//!   through actix's `ResponseError` trait.
//! - **SessionError**: failures inside one translation session. These never
//!   become HTTP responses; the lifecycle manager decides per variant whether
//!   the session keeps going, tears down, or tells the client.
//!
//! ## Session error policy:
//! | Variant                   | Effect                                             |
//! |---------------------------|----------------------------------------------------|
//! | `Decode`                  | one inbound message dropped, session continues     |
//! | `UpstreamConnect`         | session never starts, client gets an `error`       |
//! | `UpstreamWrite`           | fatal, teardown                                    |
//! | `UpstreamStreamEnded`     | fatal, teardown                                    |
//! | `DownstreamDisconnect`    | teardown, nothing is sent to the client            |
//! | `SessionClosed`           | returned to the caller, never crashes              |
//! | `ControlMessageMalformed` | `error` status to the client, loop continues       |
//! | `InvalidState`            | handshake step called out of order                 |

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **BadRequest**: Client sent invalid data, including a failed WebSocket handshake (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ServiceUnavailable**: All translation session slots are taken (503 errors)
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Session capacity exhausted
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into HTTP responses with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent sessions (10) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Configuration loading failures (bad `config.toml` syntax, unparsable
/// environment overrides) are server-side problems.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A WebSocket upgrade rejected by actix (missing headers, wrong version)
/// is the client's fault.
impl From<actix_web::Error> for AppError {
    fn from(err: actix_web::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised inside a single translation session.
///
/// ## Rust Concepts:
/// - **Clone**: the first fatal error is recorded on the shared session and
///   later read back by the lifecycle manager, so it must be copyable
/// - **PartialEq**: lets tests assert on exact variants
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Malformed inbound event from the upstream engine
    Decode(String),

    /// Could not open the upstream stream at all
    UpstreamConnect(String),

    /// Transport failure sending to the upstream engine
    UpstreamWrite(String),

    /// The upstream engine closed its side of the stream
    UpstreamStreamEnded,

    /// The downstream client went away
    DownstreamDisconnect,

    /// Operation attempted after the upstream stream was closed
    SessionClosed,

    /// Client sent a text frame that is not JSON
    ControlMessageMalformed(String),

    /// A handshake step was requested from the wrong state
    InvalidState(String),
}

impl SessionError {
    /// Whether this error ends the session with an error reported downstream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::UpstreamConnect(_)
                | SessionError::UpstreamWrite(_)
                | SessionError::UpstreamStreamEnded
        )
    }

    /// Message shown to the client in an `error` frame.
    pub fn client_message(&self) -> String {
        match self {
            SessionError::ControlMessageMalformed(_) => "Invalid JSON".to_string(),
            SessionError::UpstreamConnect(_) => "Translation service unavailable".to_string(),
            SessionError::UpstreamWrite(_) => "Lost connection to translation service".to_string(),
            SessionError::UpstreamStreamEnded => "Translation stream ended".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Decode(msg) => write!(f, "Failed to decode upstream event: {}", msg),
            SessionError::UpstreamConnect(msg) => write!(f, "Failed to connect upstream: {}", msg),
            SessionError::UpstreamWrite(msg) => write!(f, "Failed to write upstream: {}", msg),
            SessionError::UpstreamStreamEnded => write!(f, "Upstream stream ended"),
            SessionError::DownstreamDisconnect => write!(f, "Client disconnected"),
            SessionError::SessionClosed => write!(f, "Session is closed"),
            SessionError::ControlMessageMalformed(msg) => write!(f, "Malformed control message: {}", msg),
            SessionError::InvalidState(msg) => write!(f, "Invalid session state: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// A malformed inbound envelope is a decode error for that one message.
impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[test]
    fn test_only_upstream_failures_are_fatal() {
        assert!(SessionError::UpstreamWrite("broken pipe".into()).is_fatal());
        assert!(SessionError::UpstreamStreamEnded.is_fatal());
        assert!(SessionError::UpstreamConnect("refused".into()).is_fatal());

        assert!(!SessionError::Decode("eof".into()).is_fatal());
        assert!(!SessionError::DownstreamDisconnect.is_fatal());
        assert!(!SessionError::SessionClosed.is_fatal());
        assert!(!SessionError::ControlMessageMalformed("eof".into()).is_fatal());
    }

    #[test]
    fn test_malformed_control_message_reads_invalid_json() {
        let err = SessionError::ControlMessageMalformed("expected value at line 1".into());
        assert_eq!(err.client_message(), "Invalid JSON");
    }

    #[test]
    fn test_service_unavailable_response() {
        let err = AppError::ServiceUnavailable("Maximum concurrent sessions (2) reached".into());
        let response = err.error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        let body = response.into_body().try_into_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "service_unavailable");
        assert!(json["error"]["timestamp"].is_string());
    }
}
