//! Remote gateway: the contract the engine uses to reach the mail API.
//!
//! [`RemoteGateway`] has one async method per remote capability.
//! [`HttpGateway`] is the production implementation; it owns token
//! refresh through [`Authenticator`] and retries transient transport
//! failures through [`Retrier`].

pub mod auth;
mod endpoint;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod http;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use auth::{Authenticator, ExecutionLease, LeaseProvider, RefreshState, TokenRefresher};
pub use endpoint::{Endpoints, MessageAction};
pub use error::{ApiError, GatewayError, GatewayResult, TransportError, TransportErrorKind};
pub use http::HttpGateway;
pub use retry::{Retrier, RetryPolicy};

use crate::contacts::{AddressBook, Contact};
use crate::draft::Draft;
use crate::mailbox::{Mailbox, Quotas, SignatureResponse, UserId};
use crate::store::{Attachment, Folder, Message, Recipient, Thread};

/// Server-side thread list filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// No filtering.
    #[default]
    All,
    /// Read threads.
    Seen,
    /// Unread threads.
    Unseen,
    /// Starred threads.
    Starred,
    /// Threads with attachments.
    Attachments,
}

impl Filter {
    /// Query value, or `None` for [`Filter::All`].
    #[must_use]
    pub const fn query_value(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Seen => Some("seen"),
            Self::Unseen => Some("unseen"),
            Self::Starred => Some("starred"),
            Self::Attachments => Some("attachments"),
        }
    }
}

/// One page of threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ThreadPage {
    /// Threads of this page.
    #[serde(default)]
    pub threads: Vec<Thread>,
    /// Total number of threads in the folder, when the server reports it.
    #[serde(default, alias = "total_messages_count")]
    pub messages_count: Option<u32>,
    /// Server time of the response.
    #[serde(skip)]
    pub response_at: Option<DateTime<Utc>>,
}

/// Result of saving a draft.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftSaved {
    /// Server uuid of the draft.
    pub uuid: String,
    /// Uid of the message backing the draft.
    #[serde(default)]
    pub uid: Option<String>,
}

/// Result of sending a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SendReceipt {
    /// Resource to call to cancel the send, while the delay window is open.
    #[serde(default)]
    pub cancel_resource: Option<String>,
}

/// A file to upload as a draft attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Content.
    pub data: Vec<u8>,
}

/// The mail API, one method per remote capability.
///
/// Calls that act on messages take batched uid lists. Every call is
/// authenticated for the user owning `mailbox`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Lists the mailboxes of `user`.
    async fn mailboxes(&self, user: UserId) -> GatewayResult<Vec<Mailbox>>;

    /// Lists all folders of `mailbox`.
    async fn folders(&self, mailbox: &Mailbox) -> GatewayResult<Vec<Folder>>;

    /// Fetches one page of threads starting at `offset`.
    async fn threads(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        offset: u32,
        filter: Filter,
    ) -> GatewayResult<ThreadPage>;

    /// Fetches a full message, including its HTML body.
    async fn message(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<Message>;

    /// Marks messages as read.
    async fn mark_seen(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Marks messages as unread.
    async fn mark_unseen(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Moves messages to `destination_id`.
    async fn move_messages(
        &self,
        mailbox: &Mailbox,
        uids: &[String],
        destination_id: &str,
    ) -> GatewayResult<()>;

    /// Deletes messages permanently.
    async fn delete_messages(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Stars messages.
    async fn star(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Removes the star from messages.
    async fn unstar(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Reports messages as spam.
    async fn report_spam(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Reports messages as legitimate.
    async fn report_ham(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()>;

    /// Blocks the sender of the message at `resource`.
    async fn block_sender(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<()>;

    /// Fetches a draft by server uuid.
    async fn draft(&self, mailbox: &Mailbox, draft_uuid: &str) -> GatewayResult<Draft>;

    /// Fetches a draft by resource path.
    async fn draft_at(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<Draft>;

    /// Fetches the editable draft behind a draft message.
    ///
    /// Fails with [`GatewayError::Resource`] when the message carries no
    /// draft resource.
    async fn draft_from_message(
        &self,
        mailbox: &Mailbox,
        message: &Message,
    ) -> GatewayResult<Draft> {
        let resource = message
            .draft_resource
            .as_deref()
            .ok_or(GatewayError::Resource)?;
        self.draft_at(mailbox, resource).await
    }

    /// Creates the draft, or updates it when it has a server uuid.
    async fn save_draft(&self, mailbox: &Mailbox, draft: &Draft) -> GatewayResult<DraftSaved>;

    /// Sends the draft.
    async fn send_draft(&self, mailbox: &Mailbox, draft: &Draft) -> GatewayResult<SendReceipt>;

    /// Cancels a delayed send.
    async fn cancel_send(&self, mailbox: &Mailbox, cancel_resource: &str) -> GatewayResult<()>;

    /// Uploads an attachment for a draft.
    async fn create_attachment(
        &self,
        mailbox: &Mailbox,
        attachment: &NewAttachment,
    ) -> GatewayResult<Attachment>;

    /// Lists the address books of the user.
    async fn address_books(&self, mailbox: &Mailbox) -> GatewayResult<Vec<AddressBook>>;

    /// Lists the remote contacts of the user.
    async fn contacts(&self, mailbox: &Mailbox) -> GatewayResult<Vec<Contact>>;

    /// Creates a contact for `recipient` in `address_book`, returning its id.
    async fn add_contact(
        &self,
        mailbox: &Mailbox,
        recipient: &Recipient,
        address_book: &AddressBook,
    ) -> GatewayResult<String>;

    /// Lists the signatures of the mailbox.
    async fn signatures(&self, mailbox: &Mailbox) -> GatewayResult<SignatureResponse>;

    /// Fetches quota usage of the mailbox.
    async fn quotas(&self, mailbox: &Mailbox) -> GatewayResult<Quotas>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_has_no_query_value() {
        assert_eq!(Filter::All.query_value(), None);
        assert_eq!(Filter::Unseen.query_value(), Some("unseen"));
    }

    #[test]
    fn test_thread_page_decoding() {
        let page: ThreadPage = serde_json::from_str(
            r#"{"threads": [], "messages_count": 120}"#,
        )
        .unwrap();
        assert_eq!(page.messages_count, Some(120));
        assert!(page.response_at.is_none());
    }
}
