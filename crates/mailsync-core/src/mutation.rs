//! Optimistic message mutations.
//!
//! Every action is applied to the store first, so observers see it at once,
//! then sent to the server as one batched call. A failed remote call is
//! returned to the caller and the local change is left in place; the next
//! sync reconciles it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::gateway::{GatewayError, RemoteGateway};
use crate::mailbox::Mailbox;
use crate::store::{EntityStore, Folder, FolderRole};
use crate::{Error, Result};

/// Applies user actions on messages.
pub struct MutationCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    store: EntityStore,
}

impl MutationCoordinator {
    /// Creates a coordinator writing to `store`.
    #[must_use]
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: EntityStore) -> Self {
        Self { gateway, store }
    }

    /// Marks messages as seen.
    ///
    /// Every requested uid is sent, including ones already seen locally,
    /// so repeating the action after a failed call reaches the server.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway error.
    pub async fn mark_seen(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let changed = self.store.set_seen(uids, true).await?;
        debug!("Marked {} messages seen locally", changed.len());
        remote(self.gateway.mark_seen(mailbox, uids).await)
    }

    /// Marks messages as unseen.
    ///
    /// Every requested uid is sent, including ones already unseen locally,
    /// so repeating the action after a failed call reaches the server.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway error.
    pub async fn mark_unseen(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let changed = self.store.set_seen(uids, false).await?;
        debug!("Marked {} messages unseen locally", changed.len());
        remote(self.gateway.mark_unseen(mailbox, uids).await)
    }

    /// Stars messages.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway error.
    pub async fn star(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        self.store.set_flagged(uids, true).await?;
        remote(self.gateway.star(mailbox, uids).await)
    }

    /// Removes the star from messages.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway error.
    pub async fn unstar(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        self.store.set_flagged(uids, false).await?;
        remote(self.gateway.unstar(mailbox, uids).await)
    }

    /// Moves messages to a folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderNotFound`] if the folder is not stored, or the
    /// store or gateway error.
    pub async fn move_to(&self, mailbox: &Mailbox, uids: &[String], folder_id: &str) -> Result<()> {
        let folder = self
            .store
            .folder(folder_id)
            .await?
            .ok_or_else(|| Error::FolderNotFound(folder_id.to_string()))?;
        self.store.move_messages(uids, &folder.id).await?;
        debug!("Moved {} messages to {} locally", uids.len(), folder.id);
        remote(self.gateway.move_messages(mailbox, uids, &folder.id).await)
    }

    /// Moves messages to the folder holding `role`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderNotFound`] if no folder has the role, or the
    /// store or gateway error.
    pub async fn move_to_role(
        &self,
        mailbox: &Mailbox,
        uids: &[String],
        role: FolderRole,
    ) -> Result<()> {
        let folder = self.role_folder(role).await?;
        self.move_to(mailbox, uids, &folder.id).await
    }

    /// Deletes messages permanently.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway error.
    pub async fn delete(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        self.store.delete_messages(uids).await?;
        debug!("Deleted {} messages locally", uids.len());
        remote(self.gateway.delete_messages(mailbox, uids).await)
    }

    /// Moves messages to the Trash; messages already there are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderNotFound`] without a Trash folder, or the
    /// store or gateway error.
    pub async fn trash(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        let trash = self.role_folder(FolderRole::Trash).await?;
        let (in_trash, elsewhere): (Vec<_>, Vec<_>) = self
            .store
            .messages(uids)
            .await?
            .into_iter()
            .partition(|message| message.folder_id == trash.id);
        let in_trash: Vec<String> = in_trash.into_iter().map(|m| m.uid).collect();
        let elsewhere: Vec<String> = elsewhere.into_iter().map(|m| m.uid).collect();

        if !elsewhere.is_empty() {
            self.move_to(mailbox, &elsewhere, &trash.id).await?;
        }
        if !in_trash.is_empty() {
            self.delete(mailbox, &in_trash).await?;
        }
        Ok(())
    }

    /// Reports messages as spam and moves them to the Spam folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderNotFound`] without a Spam folder, or the
    /// store or gateway error.
    pub async fn report_spam(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        let spam = self.role_folder(FolderRole::Spam).await?;
        self.store.move_messages(uids, &spam.id).await?;
        remote(self.gateway.report_spam(mailbox, uids).await)
    }

    /// Reports messages as not spam and moves them to the Inbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderNotFound`] without an Inbox, or the store or
    /// gateway error.
    pub async fn not_spam(&self, mailbox: &Mailbox, uids: &[String]) -> Result<()> {
        let inbox = self.role_folder(FolderRole::Inbox).await?;
        self.store.move_messages(uids, &inbox.id).await?;
        remote(self.gateway.report_ham(mailbox, uids).await)
    }

    /// Blocks the sender of a message. Nothing changes locally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] if the message is not stored, a
    /// resource error if it has no resource, or the gateway error.
    pub async fn block_sender(&self, mailbox: &Mailbox, uid: &str) -> Result<()> {
        let message = self
            .store
            .message(uid)
            .await?
            .ok_or_else(|| Error::MessageNotFound(uid.to_string()))?;
        if message.resource.is_empty() {
            return Err(GatewayError::Resource.into());
        }
        remote(self.gateway.block_sender(mailbox, &message.resource).await)
    }

    async fn role_folder(&self, role: FolderRole) -> Result<Folder> {
        self.store
            .folder_by_role(role)
            .await?
            .ok_or_else(|| Error::FolderNotFound(role.as_str().to_string()))
    }
}

fn remote(result: std::result::Result<(), GatewayError>) -> Result<()> {
    result.map_err(|e| {
        warn!("Remote mutation failed, local state kept until next sync: {}", e);
        e.into()
    })
}
