//! Session context: the process-wide wiring of the engine.
//!
//! [`MailContext`] is built once at startup and handed to whatever needs
//! it. It owns the credential store, the authenticator, the gateway and
//! one open store per signed-in user.

use std::collections::HashMap;
use std::sync::Arc;

use mailsync_oauth::{OAuthClient, Provider};
use tokio::sync::Mutex;
use tracing::info;

use crate::contacts::{ContactManager, LocalContactSource, NoLocalContacts};
use crate::draft::{BodySource, ComposeSession, Draft};
use crate::gateway::{Authenticator, HttpGateway, RemoteGateway};
use crate::mailbox::{CredentialStore, Mailbox, UserId};
use crate::mutation::MutationCoordinator;
use crate::store::EntityStore;
use crate::sync::SyncEngine;
use crate::{Error, Result, SyncConfig};

/// Components working on one mailbox, sharing its user's store.
pub struct MailboxSession {
    /// The mailbox.
    pub mailbox: Mailbox,
    /// Folder and thread sync.
    pub sync: SyncEngine,
    /// Merged contacts.
    pub contacts: ContactManager,
    /// Optimistic message actions.
    pub mutations: MutationCoordinator,
}

/// Engine context shared by the whole process.
pub struct MailContext {
    config: SyncConfig,
    authenticator: Arc<Authenticator>,
    gateway: Arc<dyn RemoteGateway>,
    local_contacts: Arc<dyn LocalContactSource>,
    stores: Mutex<HashMap<UserId, EntityStore>>,
}

impl MailContext {
    /// Creates a context from its parts.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        authenticator: Arc<Authenticator>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        Self {
            config,
            authenticator,
            gateway,
            local_contacts: Arc::new(NoLocalContacts),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a context talking to the configured servers over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn from_config(config: SyncConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let provider = Provider::new("Infomaniak", &config.token_url)
            .map_err(|e| Error::Config(format!("invalid token URL: {e}")))?;
        let client = OAuthClient::new(config.client_id.clone(), provider);
        let authenticator = Arc::new(Authenticator::new(credentials, Arc::new(client)));
        let gateway = HttpGateway::new(&config, Arc::clone(&authenticator))?;
        Ok(Self::new(config, authenticator, Arc::new(gateway)))
    }

    /// Uses `source` for device contacts.
    #[must_use]
    pub fn with_local_contacts(mut self, source: Arc<dyn LocalContactSource>) -> Self {
        self.local_contacts = source;
        self
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token authority.
    #[must_use]
    pub const fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Remote gateway.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    /// The store of `user`, opened on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated.
    pub async fn store(&self, user: UserId) -> Result<EntityStore> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(&user) {
            return Ok(store.clone());
        }
        let path = EntityStore::path_for(&self.config.data_dir()?, user);
        let store = EntityStore::open(&path).await?;
        stores.insert(user, store.clone());
        Ok(store)
    }

    /// Mailboxes of `user`.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn mailboxes(&self, user: UserId) -> Result<Vec<Mailbox>> {
        Ok(self.gateway.mailboxes(user).await?)
    }

    /// Components for `mailbox`, sharing its user's store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub async fn mailbox_session(&self, mailbox: &Mailbox) -> Result<MailboxSession> {
        let store = self.store(mailbox.user_id).await?;
        Ok(MailboxSession {
            mailbox: mailbox.clone(),
            sync: SyncEngine::new(Arc::clone(&self.gateway), store.clone(), &self.config),
            contacts: ContactManager::new(
                Arc::clone(&self.gateway),
                store.clone(),
                Arc::clone(&self.local_contacts),
            ),
            mutations: MutationCoordinator::new(Arc::clone(&self.gateway), store),
        })
    }

    /// Opens a compose session on `draft`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub async fn compose(
        &self,
        mailbox: &Mailbox,
        draft: Draft,
        body_source: Option<Arc<dyn BodySource>>,
    ) -> Result<ComposeSession> {
        let store = self.store(mailbox.user_id).await?;
        Ok(ComposeSession::open(
            mailbox.clone(),
            Arc::clone(&self.gateway),
            store,
            draft,
            &self.config,
            body_source,
        ))
    }

    /// Reopens a draft kept in the local store. Returns `None` if no such
    /// draft is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the draft cannot
    /// be read.
    pub async fn resume_draft(
        &self,
        mailbox: &Mailbox,
        local_uuid: &str,
        body_source: Option<Arc<dyn BodySource>>,
    ) -> Result<Option<ComposeSession>> {
        let store = self.store(mailbox.user_id).await?;
        let Some(draft) = store.draft(local_uuid).await? else {
            return Ok(None);
        };
        self.compose(mailbox, draft, body_source).await.map(Some)
    }

    /// Closes the store of `user` and removes its credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be deleted.
    pub async fn sign_out(&self, user: UserId) -> Result<()> {
        if let Some(store) = self.stores.lock().await.remove(&user) {
            store.close().await;
        }
        self.authenticator.sign_out(user)?;
        info!("Signed out user {}", user);
        Ok(())
    }
}
