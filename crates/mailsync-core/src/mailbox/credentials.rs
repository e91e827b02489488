//! Credential storage.
//!
//! Tokens are kept in the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! [`MemoryCredentialStore`] backs tests and short-lived sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;
use mailsync_oauth::Token;
use tracing::{debug, warn};

use super::UserId;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailsync";

/// Credential type identifier for `OAuth2` tokens.
const OAUTH_TOKEN_CREDENTIAL: &str = "oauth_token";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Stored token could not be decoded.
    #[error("Stored token is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Storage is temporarily unreachable.
    #[error("Credential storage unavailable")]
    Unavailable,
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Persistent storage for per-user tokens.
///
/// Implementations must be safe to share between the authenticator and
/// other processes writing the same entries; reads always go to storage.
pub trait CredentialStore: Send + Sync {
    /// Loads the stored token for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn load(&self, user: UserId) -> CredentialResult<Option<Token>>;

    /// Stores `token` for `user`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn store(&self, user: UserId, token: &Token) -> CredentialResult<()>;

    /// Deletes the token for `user`. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn delete(&self, user: UserId) -> CredentialResult<()>;
}

/// Generates the keyring entry key for a credential.
fn credential_key(user: UserId, credential_type: &str) -> String {
    format!("{SERVICE_NAME}_{credential_type}_{}", user.0)
}

/// Token storage in the system keyring, serialized as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry(user: UserId) -> CredentialResult<Entry> {
        let key = credential_key(user, OAUTH_TOKEN_CREDENTIAL);
        Ok(Entry::new(SERVICE_NAME, &key)?)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self, user: UserId) -> CredentialResult<Option<Token>> {
        match Self::entry(user)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => {
                debug!("No token found for user {user}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, user: UserId, token: &Token) -> CredentialResult<()> {
        let json = serde_json::to_string(token)?;
        Self::entry(user)?.set_password(&json)?;
        debug!("Stored token for user {user}");
        Ok(())
    }

    fn delete(&self, user: UserId) -> CredentialResult<()> {
        match Self::entry(user)?.delete_credential() {
            Ok(()) => debug!("Deleted token for user {user}"),
            Err(keyring::Error::NoEntry) => {
                debug!("No token to delete for user {user}");
            }
            Err(e) => {
                warn!("Failed to delete token: {e}");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// In-process token storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<HashMap<UserId, Token>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, user: UserId) -> CredentialResult<Option<Token>> {
        let tokens = self.tokens.lock().map_err(|_| CredentialError::Unavailable)?;
        Ok(tokens.get(&user).cloned())
    }

    fn store(&self, user: UserId, token: &Token) -> CredentialResult<()> {
        self.tokens
            .lock()
            .map_err(|_| CredentialError::Unavailable)?
            .insert(user, token.clone());
        Ok(())
    }

    fn delete(&self, user: UserId) -> CredentialResult<()> {
        self.tokens
            .lock()
            .map_err(|_| CredentialError::Unavailable)?
            .remove(&user);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_format() {
        assert_eq!(
            credential_key(UserId(123), OAUTH_TOKEN_CREDENTIAL),
            "mailsync_oauth_token_123"
        );
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert!(store.load(UserId(1)).unwrap().is_none());

        store.store(UserId(1), &Token::new("a", "Bearer")).unwrap();
        assert_eq!(store.load(UserId(1)).unwrap().unwrap().access_token, "a");
        assert!(store.load(UserId(2)).unwrap().is_none());

        store.delete(UserId(1)).unwrap();
        store.delete(UserId(1)).unwrap();
        assert!(store.load(UserId(1)).unwrap().is_none());
    }
}
