//! Token refresh coordination.
//!
//! Refreshes for one user are serialized behind a per-user lock, so
//! concurrent requests that fail authentication wait for a single refresh
//! instead of racing the identity provider. Before contacting the provider,
//! the credential store is re-read: another refresh (in this process or
//! another one sharing the store) may already have produced a newer token.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mailsync_oauth::{OAuthClient, Token};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::{GatewayError, GatewayResult};
use crate::mailbox::{CredentialError, CredentialStore, UserId};

/// Identity provider refresh call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges the refresh token of `token` for a new token.
    ///
    /// # Errors
    ///
    /// A revoked grant must be reported so that
    /// [`mailsync_oauth::Error::is_invalid_grant`] returns true.
    async fn refresh(&self, token: &Token) -> mailsync_oauth::Result<Token>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, token: &Token) -> mailsync_oauth::Result<Token> {
        self.refresh_token(token).await
    }
}

/// Grants extended execution time while a refresh is in flight.
pub trait LeaseProvider: Send + Sync {
    /// Requests a lease, or `None` if no extra time can be granted.
    fn acquire(&self, name: &str) -> Option<ExecutionLease>;
}

/// An extended-execution lease.
///
/// The lease is released exactly once: explicitly through
/// [`ExecutionLease::release`], after its expiry fires, or on drop.
pub struct ExecutionLease {
    expired: Option<oneshot::Receiver<()>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ExecutionLease {
    /// Creates a lease that expires when `expired` fires and runs `release`
    /// when it ends.
    pub fn new(expired: oneshot::Receiver<()>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            expired: Some(expired),
            release: Some(Box::new(release)),
        }
    }

    /// Resolves when the lease expires. Never resolves if the expiry
    /// sender is dropped without firing.
    pub async fn expired(&mut self) {
        let fired = match self.expired.as_mut() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        };
        self.expired = None;
        if !fired {
            std::future::pending::<()>().await;
        }
    }

    /// Ends the lease. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ExecutionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLease")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Refresh state of a user's credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshState {
    /// No refresh has run since the last reset.
    #[default]
    Idle,
    /// A refresh is in flight.
    Refreshing,
    /// The last refresh produced a usable token.
    Succeeded,
    /// The last refresh failed; the previous token was kept.
    FailedRetryable,
    /// The grant was revoked; the user must sign in again.
    FailedFatal,
}

/// Hands out credentials and coordinates their refresh.
pub struct Authenticator {
    credentials: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    lease_provider: Option<Arc<dyn LeaseProvider>>,
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    states: Mutex<HashMap<UserId, RefreshState>>,
    invalidated: Mutex<HashSet<UserId>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("lease_provider", &self.lease_provider.is_some())
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Refreshed(Token),
    Revoked(mailsync_oauth::Error),
    Failed(mailsync_oauth::Error),
}

impl Authenticator {
    /// Creates an authenticator without an execution lease provider.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            credentials,
            refresher,
            lease_provider: None,
            locks: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            invalidated: Mutex::new(HashSet::new()),
        }
    }

    /// Holds a lease from `provider` for the duration of each refresh.
    #[must_use]
    pub fn with_lease_provider(mut self, provider: Arc<dyn LeaseProvider>) -> Self {
        self.lease_provider = Some(provider);
        self
    }

    /// Returns the credential store.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Current refresh state for `user`.
    #[must_use]
    pub fn state(&self, user: UserId) -> RefreshState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, user: UserId, state: RefreshState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, state);
    }

    fn is_invalidated(&self, user: UserId) -> bool {
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user)
    }

    fn user_lock(&self, user: UserId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(user)
                .or_default(),
        )
    }

    /// Returns the stored token for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AuthInvalid`] after a revoked refresh until
    /// [`Authenticator::reauthenticate`], and [`GatewayError::NoToken`] if no
    /// token is stored or the store cannot be read.
    pub fn credential(&self, user: UserId) -> GatewayResult<Token> {
        if self.is_invalidated(user) {
            return Err(GatewayError::AuthInvalid);
        }
        match self.credentials.load(user) {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(GatewayError::NoToken),
            Err(e) => {
                warn!("Could not read credential for user {}: {}", user, e);
                Err(GatewayError::NoToken)
            }
        }
    }

    /// Refreshes `failed`, the token a request was rejected with.
    ///
    /// Returns a newer stored token without a network call if one exists.
    /// A transient refresh failure returns `failed` unchanged, so the caller
    /// proceeds and may fail again downstream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AuthInvalid`] when the grant is revoked, and
    /// [`GatewayError::NoToken`] when the store is unreadable or no
    /// execution lease can be obtained.
    pub async fn refresh(&self, user: UserId, failed: &Token) -> GatewayResult<Token> {
        let lock = self.user_lock(user);
        let _serialized = lock.lock().await;

        if self.is_invalidated(user) {
            return Err(GatewayError::AuthInvalid);
        }

        self.set_state(user, RefreshState::Refreshing);
        info!("Refreshing token for user {} - Starting", user);

        let stored = match self.credentials.load(user) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Refreshing token failed - Credential store unreadable: {}", e);
                self.set_state(user, RefreshState::FailedRetryable);
                return Err(GatewayError::NoToken);
            }
        };
        if let Some(stored) = stored.filter(|t| t.is_newer_than(failed)) {
            info!("Refreshing token for user {} - Success with local", user);
            self.set_state(user, RefreshState::Succeeded);
            return Ok(stored);
        }

        let mut lease = match &self.lease_provider {
            Some(provider) => {
                let Some(lease) = provider.acquire("Refresh token") else {
                    warn!("Refreshing token failed - No execution lease available");
                    self.set_state(user, RefreshState::FailedRetryable);
                    return Err(GatewayError::NoToken);
                };
                Some(lease)
            }
            None => None,
        };

        let result = {
            let refresh = self.refresher.refresh(failed);
            tokio::pin!(refresh);
            match lease.as_mut() {
                Some(lease) => tokio::select! {
                    result = &mut refresh => result,
                    () = lease.expired() => {
                        error!("Refreshing token failed - Execution lease expired");
                        lease.release();
                        refresh.await
                    }
                },
                None => refresh.await,
            }
        };
        drop(lease);

        let outcome = match result {
            Ok(token) => Outcome::Refreshed(token),
            Err(e) if e.is_invalid_grant() => Outcome::Revoked(e),
            Err(e) => Outcome::Failed(e),
        };

        match outcome {
            Outcome::Refreshed(token) => {
                info!("Refreshing token for user {} - Success with remote", user);
                if let Err(e) = self.credentials.store(user, &token) {
                    warn!("Could not persist refreshed token: {}", e);
                }
                self.set_state(user, RefreshState::Succeeded);
                Ok(token)
            }
            Outcome::Revoked(e) => {
                error!("Refreshing token failed - Invalid grant: {}", e);
                if let Err(e) = self.credentials.delete(user) {
                    warn!("Could not delete revoked token: {}", e);
                }
                self.invalidated
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(user);
                self.set_state(user, RefreshState::FailedFatal);
                Err(GatewayError::AuthInvalid)
            }
            Outcome::Failed(e) => {
                warn!("Refreshing token failed - Other: {}", e);
                self.set_state(user, RefreshState::FailedRetryable);
                Ok(failed.clone())
            }
        }
    }

    /// Stores a token obtained by a new sign-in and clears invalidation.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be stored.
    pub fn reauthenticate(&self, user: UserId, token: &Token) -> Result<(), CredentialError> {
        self.credentials.store(user, token)?;
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        self.set_state(user, RefreshState::Idle);
        info!("User {} reauthenticated", user);
        Ok(())
    }

    /// Removes the credential and all refresh state of `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be deleted.
    pub fn sign_out(&self, user: UserId) -> Result<(), CredentialError> {
        self.credentials.delete(user)?;
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        Ok(())
    }
}
