//! In-memory gateway for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    DraftSaved, Filter, GatewayError, GatewayResult, NewAttachment, RemoteGateway, SendReceipt,
    ThreadPage,
};
use crate::contacts::{AddressBook, Contact};
use crate::draft::Draft;
use crate::mailbox::{Mailbox, Quotas, SignatureResponse, UserId};
use crate::store::{Attachment, Folder, Message, Recipient};

pub fn mailbox() -> Mailbox {
    Mailbox {
        mailbox_id: 1,
        uuid: "mailbox-uuid".to_string(),
        email: "me@example.com".to_string(),
        mailbox: "me".to_string(),
        hosting_id: 10,
        link_id: 2,
        user_id: UserId(7),
        unseen_messages: 0,
        quotas: None,
    }
}

/// Scripted gateway. Responses are set through the public fields; every
/// call is recorded as `"<method> <argument>"`.
#[derive(Default)]
pub struct FakeGateway {
    pub folders: Mutex<Vec<Folder>>,
    /// Pages by `(folder id, offset)`.
    pub pages: Mutex<HashMap<(String, u32), ThreadPage>>,
    /// Full messages by resource.
    pub messages: Mutex<HashMap<String, Message>>,
    pub address_books: Mutex<Vec<AddressBook>>,
    pub contacts: Mutex<Vec<Contact>>,
    /// Contact appended to `contacts` by `add_contact`.
    pub created_contact: Mutex<Option<Contact>>,
    pub signatures: Mutex<SignatureResponse>,
    /// Methods that fail with a server error.
    pub failing: Mutex<HashSet<&'static str>>,
    /// Latency applied to `threads` and `save_draft`.
    pub delay: Duration,
    calls: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeGateway {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, method: &'static str) {
        lock(&self.failing).insert(method);
    }

    pub fn recover(&self, method: &'static str) {
        lock(&self.failing).remove(method);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    pub fn set_page(&self, folder_id: &str, offset: u32, page: ThreadPage) {
        lock(&self.pages).insert((folder_id.to_string(), offset), page);
    }

    async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn record(&self, method: &'static str, argument: impl Into<String>) -> GatewayResult<()> {
        lock(&self.calls).push(format!("{method} {}", argument.into()));
        if lock(&self.failing).contains(method) {
            Err(GatewayError::Server { status: 500 })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn mailboxes(&self, user: UserId) -> GatewayResult<Vec<Mailbox>> {
        self.record("mailboxes", user.to_string())?;
        Ok(vec![mailbox()])
    }

    async fn folders(&self, _mailbox: &Mailbox) -> GatewayResult<Vec<Folder>> {
        self.record("folders", "")?;
        Ok(lock(&self.folders).clone())
    }

    async fn threads(
        &self,
        _mailbox: &Mailbox,
        folder_id: &str,
        offset: u32,
        _filter: Filter,
    ) -> GatewayResult<ThreadPage> {
        self.wait().await;
        self.record("threads", format!("{folder_id}@{offset}"))?;
        Ok(lock(&self.pages)
            .get(&(folder_id.to_string(), offset))
            .cloned()
            .unwrap_or_default())
    }

    async fn message(&self, _mailbox: &Mailbox, resource: &str) -> GatewayResult<Message> {
        self.record("message", resource)?;
        lock(&self.messages)
            .get(resource)
            .cloned()
            .ok_or(GatewayError::Server { status: 404 })
    }

    async fn mark_seen(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("mark_seen", uids.join(","))
    }

    async fn mark_unseen(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("mark_unseen", uids.join(","))
    }

    async fn move_messages(
        &self,
        _mailbox: &Mailbox,
        uids: &[String],
        destination_id: &str,
    ) -> GatewayResult<()> {
        self.record("move_messages", format!("{}->{destination_id}", uids.join(",")))
    }

    async fn delete_messages(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("delete_messages", uids.join(","))
    }

    async fn star(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("star", uids.join(","))
    }

    async fn unstar(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("unstar", uids.join(","))
    }

    async fn report_spam(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("report_spam", uids.join(","))
    }

    async fn report_ham(&self, _mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.record("report_ham", uids.join(","))
    }

    async fn block_sender(&self, _mailbox: &Mailbox, resource: &str) -> GatewayResult<()> {
        self.record("block_sender", resource)
    }

    async fn draft(&self, _mailbox: &Mailbox, draft_uuid: &str) -> GatewayResult<Draft> {
        self.record("draft", draft_uuid)?;
        Ok(Draft {
            uuid: Some(draft_uuid.to_string()),
            ..Draft::new()
        })
    }

    async fn draft_at(&self, _mailbox: &Mailbox, resource: &str) -> GatewayResult<Draft> {
        self.record("draft_at", resource)?;
        Ok(Draft::new())
    }

    async fn save_draft(&self, _mailbox: &Mailbox, draft: &Draft) -> GatewayResult<DraftSaved> {
        self.wait().await;
        self.record("save_draft", draft.body.clone())?;
        Ok(DraftSaved {
            uuid: draft
                .uuid
                .clone()
                .unwrap_or_else(|| "remote-draft".to_string()),
            uid: Some("draft-uid".to_string()),
        })
    }

    async fn send_draft(&self, _mailbox: &Mailbox, draft: &Draft) -> GatewayResult<SendReceipt> {
        self.record("send_draft", draft.body.clone())?;
        Ok(SendReceipt {
            cancel_resource: draft
                .delay
                .map(|_| "/api/mail/mailbox-uuid/cancel-send".to_string()),
        })
    }

    async fn cancel_send(&self, _mailbox: &Mailbox, cancel_resource: &str) -> GatewayResult<()> {
        self.record("cancel_send", cancel_resource)
    }

    async fn create_attachment(
        &self,
        _mailbox: &Mailbox,
        attachment: &NewAttachment,
    ) -> GatewayResult<Attachment> {
        self.record("create_attachment", attachment.name.clone())?;
        Ok(Attachment {
            uuid: Some(format!("att-{}", attachment.name)),
            part_id: String::new(),
            mime_type: attachment.mime_type.clone(),
            encoding: None,
            size: u64::try_from(attachment.data.len()).unwrap_or_default(),
            name: attachment.name.clone(),
            disposition: crate::store::AttachmentDisposition::Attachment,
            content_id: None,
            resource: None,
            drive_url: None,
        })
    }

    async fn address_books(&self, _mailbox: &Mailbox) -> GatewayResult<Vec<AddressBook>> {
        self.record("address_books", "")?;
        Ok(lock(&self.address_books).clone())
    }

    async fn contacts(&self, _mailbox: &Mailbox) -> GatewayResult<Vec<Contact>> {
        self.record("contacts", "")?;
        Ok(lock(&self.contacts).clone())
    }

    async fn add_contact(
        &self,
        _mailbox: &Mailbox,
        recipient: &Recipient,
        address_book: &AddressBook,
    ) -> GatewayResult<String> {
        self.record("add_contact", format!("{}@{}", recipient.email, address_book.id))?;
        let created = lock(&self.created_contact).take();
        match created {
            Some(contact) => {
                let id = contact.id.clone();
                lock(&self.contacts).push(contact);
                Ok(id)
            }
            None => Ok("unknown".to_string()),
        }
    }

    async fn signatures(&self, _mailbox: &Mailbox) -> GatewayResult<SignatureResponse> {
        self.record("signatures", "")?;
        Ok(lock(&self.signatures).clone())
    }

    async fn quotas(&self, _mailbox: &Mailbox) -> GatewayResult<Quotas> {
        self.record("quotas", "")?;
        Ok(Quotas { size: 1024 })
    }
}
