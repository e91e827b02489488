//! Error types for token refresh.

/// Result type alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error code the login service returns once a refresh token is revoked.
pub const INVALID_GRANT: &str = "invalid_grant";

/// Token refresh errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure talking to the token endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON from the token endpoint.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The login service refused the request.
    #[error("token request rejected ({status}): {code} {description}")]
    Rejected {
        /// HTTP status of the response.
        status: u16,
        /// `OAuth2` error code, e.g. `invalid_grant`.
        code: String,
        /// Human-readable description, possibly empty.
        description: String,
    },

    /// The credential carries no refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The response was successful but unusable.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Bad provider configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token endpoint URL did not parse.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Creates a rejection with the given status and `OAuth2` error code.
    #[must_use]
    pub fn rejected(status: u16, code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            code: code.into(),
            description: description.into(),
        }
    }

    /// Returns true if the credential can never be refreshed again.
    ///
    /// The user has to sign in anew; retrying is pointless.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => code == INVALID_GRANT,
            Self::MissingRefreshToken => true,
            _ => false,
        }
    }

    /// Returns true if the same refresh may succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_detection() {
        assert!(Error::rejected(400, "invalid_grant", "revoked").is_invalid_grant());
        assert!(Error::MissingRefreshToken.is_invalid_grant());
        assert!(!Error::rejected(503, "temporarily_unavailable", "").is_invalid_grant());
        assert!(!Error::InvalidResponse("empty".into()).is_invalid_grant());
    }

    #[test]
    fn test_transient_detection() {
        assert!(Error::rejected(503, "temporarily_unavailable", "").is_transient());
        assert!(Error::rejected(429, "slow_down", "").is_transient());
        assert!(!Error::rejected(400, "invalid_grant", "").is_transient());
        assert!(!Error::MissingRefreshToken.is_transient());
    }
}
