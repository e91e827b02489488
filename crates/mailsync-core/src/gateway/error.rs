//! Gateway error taxonomy.

use thiserror::Error;

use crate::ErrorKind;

/// Structured error reported by the mail API.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Deserialize)]
#[error("{code}: {description}")]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl ApiError {
    /// Creates an API error.
    #[must_use]
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Class of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request timed out.
    Timeout,
    /// The connection dropped or could not be established.
    ConnectionLost,
    /// Any other network failure.
    Other,
}

/// A failure below the HTTP status layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Whether part of the response had already been received.
    pub response_started: bool,
    /// Description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(
        kind: TransportErrorKind,
        response_started: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            response_started,
            message: message.into(),
        }
    }

    /// Timeouts and lost connections are transient; the rest is fatal.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::ConnectionLost
        )
    }

    /// Classifies a `reqwest` failure.
    pub(crate) fn from_reqwest(error: &reqwest::Error, response_started: bool) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            TransportErrorKind::ConnectionLost
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, response_started, error.to_string())
    }
}

/// Errors returned by a [`RemoteGateway`](super::RemoteGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The server reported a structured error.
    #[error("API error: {0}")]
    Api(ApiError),

    /// The server answered with an unexpected status and no error payload.
    #[error("Server error: HTTP {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// Network failure.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// A resource URL or field required for the call is missing locally.
    #[error("Required resource is missing")]
    Resource,

    /// No usable credential could be obtained.
    #[error("No valid token")]
    NoToken,

    /// The credential was revoked; the user must sign in again.
    #[error("Credential invalidated, reauthentication required")]
    AuthInvalid,

    /// The response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(_) => ErrorKind::Api,
            Self::Server { status: 401 } | Self::NoToken => ErrorKind::AuthExpired,
            Self::Server { .. } | Self::Decode(_) => ErrorKind::TransportFatal,
            Self::Transport(e) if e.is_transient() => ErrorKind::TransportTransient,
            Self::Transport(_) => ErrorKind::TransportFatal,
            Self::Resource => ErrorKind::LocalPrecondition,
            Self::AuthInvalid => ErrorKind::AuthInvalid,
        }
    }

    /// Returns true for transport failures the retry policy may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = TransportError::new(TransportErrorKind::Timeout, false, "t");
        let lost = TransportError::new(TransportErrorKind::ConnectionLost, false, "l");
        let other = TransportError::new(TransportErrorKind::Other, false, "o");
        assert!(timeout.is_transient());
        assert!(lost.is_transient());
        assert!(!other.is_transient());
        assert!(GatewayError::Transport(timeout).is_transient());
        assert!(!GatewayError::Server { status: 503 }.is_transient());
    }

    #[test]
    fn test_api_error_display() {
        let err = GatewayError::Api(ApiError::new("folder_not_found", "Folder missing"));
        assert_eq!(err.to_string(), "API error: folder_not_found: Folder missing");
    }
}
