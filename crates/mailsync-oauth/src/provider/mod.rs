//! Identity provider endpoints.

use url::Url;

use crate::error::{Error, Result};

/// Token endpoint of the Infomaniak login service.
pub const INFOMANIAK_TOKEN_URL: &str = "https://login.infomaniak.com/token";

/// Identity provider the engine refreshes credentials against.
///
/// The engine never runs the interactive authorization flow, so the token
/// endpoint is all it needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    /// Display name, used in logs.
    pub name: String,
    /// Token endpoint.
    pub token_url: Url,
}

impl Provider {
    /// Creates a provider from its token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `token_url` does not parse and
    /// [`Error::InvalidConfig`] if it is not an HTTP(S) URL.
    pub fn new(name: impl Into<String>, token_url: impl AsRef<str>) -> Result<Self> {
        let token_url = Url::parse(token_url.as_ref())?;
        if !matches!(token_url.scheme(), "https" | "http") {
            return Err(Error::InvalidConfig(format!(
                "unsupported token endpoint scheme: {}",
                token_url.scheme()
            )));
        }
        Ok(Self {
            name: name.into(),
            token_url,
        })
    }

    /// Returns the Infomaniak login service.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`Self::new`].
    pub fn infomaniak() -> Result<Self> {
        Self::new("Infomaniak", INFOMANIAK_TOKEN_URL)
    }
}
