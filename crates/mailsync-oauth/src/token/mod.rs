//! Credential model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How long before its expiry a token is treated as expired.
const EXPIRY_MARGIN: Duration = Duration::seconds(60);

/// An access token plus what is needed to renew it.
///
/// This is what the credential store persists per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token presented to the API.
    pub access_token: String,
    /// Authorization scheme, `Bearer` for Infomaniak.
    pub token_type: String,
    /// Expiry, if the login service sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Long-lived token used to renew the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Account the login service issued the token for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Token {
    /// Creates a token without expiry or refresh token.
    #[must_use]
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
            refresh_token: None,
            user_id: None,
        }
    }

    /// Builds a token from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResponse`] if the access token is empty.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        if response.access_token.is_empty() {
            return Err(Error::InvalidResponse("empty access_token".into()));
        }
        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(i64::from(secs))),
            refresh_token: response.refresh_token,
            user_id: response.user_id,
        })
    }

    /// True once the token is within a minute of its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + EXPIRY_MARGIN >= exp)
    }

    /// Returns true if this token expires strictly later than `other`.
    ///
    /// A token without an expiration is never considered newer.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        match (self.expires_at, other.expires_at) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Value of the `Authorization` header for API requests.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRefreshToken`] if there is none.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingRefreshToken)
    }
}

fn bearer() -> String {
    "Bearer".to_string()
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Authorization scheme, defaulting to `Bearer`.
    #[serde(default = "bearer")]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u32>,
    /// Replacement refresh token, when the service rotates it.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Account id.
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Error body of a rejected token request.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// `OAuth2` error code.
    pub error: String,
    /// Description, possibly absent.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an [`Error::Rejected`] carrying `status`.
    #[must_use]
    pub fn into_error(self, status: u16) -> Error {
        Error::rejected(status, self.error, self.error_description)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_token_required() {
        let token = Token::new("access", "Bearer").with_refresh_token("refresh");
        assert_eq!(token.refresh_token().unwrap(), "refresh");
        assert!(matches!(
            Token::new("a", "Bearer").refresh_token(),
            Err(Error::MissingRefreshToken)
        ));
        assert!(matches!(
            Token::new("a", "Bearer").with_refresh_token("").refresh_token(),
            Err(Error::MissingRefreshToken)
        ));
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let nearly = Token::new("a", "Bearer").with_expires_at(now + Duration::seconds(30));
        assert!(nearly.is_expired());

        let valid = Token::new("a", "Bearer").with_expires_at(now + Duration::hours(1));
        assert!(!valid.is_expired());
        assert!(!Token::new("a", "Bearer").is_expired());
    }

    #[test]
    fn test_is_newer_than() {
        let now = Utc::now();
        let old = Token::new("old", "Bearer").with_expires_at(now);
        let new = Token::new("new", "Bearer").with_expires_at(now + Duration::seconds(10));
        let same = Token::new("same", "Bearer").with_expires_at(now);
        let unbounded = Token::new("none", "Bearer");

        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
        assert!(!same.is_newer_than(&old));
        assert!(old.is_newer_than(&unbounded));
        assert!(!unbounded.is_newer_than(&old));
    }

    #[test]
    fn test_from_infomaniak_response() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"abc","expires_in":7200,"refresh_token":"r","user_id":42}"#,
        )
        .unwrap();

        let token = Token::from_response(response, now).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_at, Some(now + Duration::seconds(7200)));
        assert_eq!(token.user_id, Some(42));
        assert_eq!(token.authorization(), "Bearer abc");
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":""}"#).unwrap();
        assert!(matches!(
            Token::from_response(response, Utc::now()),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_stored_form_omits_missing_fields() {
        let json = serde_json::to_string(&Token::new("a", "Bearer")).unwrap();
        assert_eq!(json, r#"{"access_token":"a","token_type":"Bearer"}"#);
    }
}
