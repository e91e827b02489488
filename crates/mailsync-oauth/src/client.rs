//! Refresh client for the login service.

use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};

/// Renews tokens with the `refresh_token` grant.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Public client id the app is registered under.
    pub client_id: String,
    /// Login service.
    pub provider: Provider,
    http_client: Client,
}

impl OAuthClient {
    /// Creates a client for `provider`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            provider,
            http_client: Client::new(),
        }
    }

    /// Exchanges the refresh token of `token` for a new token.
    ///
    /// The login service may omit the refresh token from its answer, in which
    /// case the old one is kept. The account id is kept the same way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRefreshToken`] without a network call if
    /// `token` has no refresh token. A revoked grant is reported as
    /// [`Error::Rejected`] with code `invalid_grant`.
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token()?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        debug!("Refreshing token against {}", self.provider.name);
        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(serde_json::from_str::<ErrorResponse>(&body).map_or_else(
                |_| Error::rejected(status.as_u16(), "http_error", status.to_string()),
                |e| e.into_error(status.as_u16()),
            ));
        }

        let response: TokenResponse = serde_json::from_str(&body)?;
        let mut renewed = Token::from_response(response, Utc::now())?;
        if renewed.refresh_token.is_none() {
            renewed.refresh_token.clone_from(&token.refresh_token);
        }
        if renewed.user_id.is_none() {
            renewed.user_id = token.user_id;
        }
        Ok(renewed)
    }
}
