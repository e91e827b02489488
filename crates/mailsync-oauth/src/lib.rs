//! # mailsync-oauth
//!
//! `OAuth2` token handling for the mailsync engine.
//!
//! ## Features
//!
//! - **Token model**: the stored credential, with expiry and freshness checks
//! - **Token refresh**: `refresh_token` grant against the Infomaniak login service
//! - **Error classification**: a revoked grant is told apart from transient failures
//!
//! ## Token Refresh
//!
//! ```ignore
//! use mailsync_oauth::{OAuthClient, Provider};
//!
//! let provider = Provider::infomaniak()?;
//! let client = OAuthClient::new("your_client_id", provider);
//!
//! match client.refresh_token(&token).await {
//!     Ok(new_token) => store(new_token),
//!     Err(e) if e.is_invalid_grant() => sign_out(),
//!     Err(e) if e.is_transient() => retry_later(),
//!     Err(e) => return Err(e),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod provider;
pub mod token;

pub use client::OAuthClient;
pub use error::{Error, Result};
pub use provider::Provider;
pub use token::Token;
