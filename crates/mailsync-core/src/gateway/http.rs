//! `reqwest` implementation of [`RemoteGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_oauth::Token;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use super::{
    ApiError, Authenticator, DraftSaved, Endpoints, Filter, GatewayError, GatewayResult,
    MessageAction, NewAttachment, RemoteGateway, Retrier, RetryPolicy, SendReceipt, ThreadPage,
    TransportError,
};
use crate::contacts::{AddressBook, Contact};
use crate::draft::Draft;
use crate::mailbox::{Mailbox, Quotas, SignatureResponse, UserId};
use crate::store::{Attachment, Folder, Message, Recipient};
use crate::{Error, Result, SyncConfig};

/// Response envelope shared by every API call.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    response_at: Option<i64>,
}

#[derive(Debug, Clone)]
enum Body {
    Empty,
    Json(Value),
    Raw {
        data: Vec<u8>,
        headers: Vec<(&'static str, String)>,
    },
}

#[derive(Debug, Deserialize)]
struct AddressBooks {
    #[serde(default)]
    addressbooks: Vec<AddressBook>,
}

#[derive(Serialize)]
struct DraftPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<&'a str>,
    identity_id: Option<i64>,
    in_reply_to_uid: Option<&'a str>,
    forwarded_uid: Option<&'a str>,
    in_reply_to: Option<&'a str>,
    references: Option<&'a str>,
    to: &'a [Recipient],
    cc: &'a [Recipient],
    bcc: &'a [Recipient],
    subject: &'a str,
    body: &'a str,
    mime_type: &'a str,
    attachments: Vec<&'a str>,
    delay: Option<u32>,
    action: &'static str,
}

impl<'a> DraftPayload<'a> {
    fn new(draft: &'a Draft, action: &'static str) -> Self {
        Self {
            uuid: draft.uuid.as_deref(),
            identity_id: draft.identity_id,
            in_reply_to_uid: draft.in_reply_to_uid.as_deref(),
            forwarded_uid: draft.forwarded_uid.as_deref(),
            in_reply_to: draft.in_reply_to.as_deref(),
            references: draft.references.as_deref(),
            to: &draft.to,
            cc: &draft.cc,
            bcc: &draft.bcc,
            subject: &draft.subject,
            body: &draft.body,
            mime_type: &draft.mime_type,
            attachments: draft
                .attachments
                .iter()
                .filter_map(|a| a.uuid.as_deref())
                .collect(),
            delay: draft.delay,
            action,
        }
    }
}

/// HTTP gateway to the mail API.
pub struct HttpGateway {
    client: Client,
    endpoints: Endpoints,
    authenticator: Arc<Authenticator>,
    retrier: Retrier,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Creates a gateway for the configured API.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a base URL is invalid.
    pub fn new(config: &SyncConfig, authenticator: Arc<Authenticator>) -> Result<Self> {
        let endpoints = Endpoints::new(&config.api_base_url, &config.manager_base_url)
            .map_err(|e| Error::Config(format!("invalid base URL: {e}")))?;
        Ok(Self::with_endpoints(
            endpoints,
            authenticator,
            RetryPolicy::from(config),
        ))
    }

    /// Creates a gateway from prebuilt endpoints.
    #[must_use]
    pub fn with_endpoints(
        endpoints: Endpoints,
        authenticator: Arc<Authenticator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoints,
            authenticator,
            retrier: Retrier::new(policy),
        }
    }

    /// Returns the authenticator.
    #[must_use]
    pub const fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    fn request(&self, method: &Method, url: &Url, body: &Body, token: &Token) -> RequestBuilder {
        let request = self
            .client
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, token.authorization());
        match body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Raw { data, headers } => headers
                .iter()
                .fold(request, |r, (name, value)| r.header(*name, value))
                .body(data.clone()),
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        body: &Body,
        token: &Token,
    ) -> GatewayResult<Response> {
        self.retrier
            .run(url.as_str(), || {
                let request = self.request(method, url, body, token);
                async move {
                    request.send().await.map_err(|e| {
                        GatewayError::Transport(TransportError::from_reqwest(&e, false))
                    })
                }
            })
            .await
    }

    /// Sends an authenticated request, refreshing the token once on 401.
    async fn perform_raw(
        &self,
        user: UserId,
        method: Method,
        url: Url,
        body: Body,
    ) -> GatewayResult<(Value, Option<DateTime<Utc>>)> {
        let token = self.authenticator.credential(user)?;
        let mut response = self.send(&method, &url, &body, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("{} {} rejected with 401, refreshing token", method, url);
            let token = self.authenticator.refresh(user, &token).await?;
            response = self.send(&method, &url, &body, &token).await?;
        }

        decode(response).await
    }

    async fn perform<T: DeserializeOwned>(
        &self,
        user: UserId,
        method: Method,
        url: Url,
        body: Body,
    ) -> GatewayResult<T> {
        let (data, _) = self.perform_raw(user, method, url, body).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn message_action(
        &self,
        mailbox: &Mailbox,
        action: MessageAction,
        body: Value,
    ) -> GatewayResult<()> {
        let url = self.endpoints.message_action(&mailbox.uuid, action);
        self.perform_raw(mailbox.user_id, Method::POST, url, Body::Json(body))
            .await
            .map(|_| ())
    }

    fn resource(&self, resource: &str, query: &[(&str, Option<String>)]) -> GatewayResult<Url> {
        self.endpoints.resource(resource, query).map_err(|e| {
            warn!("Invalid resource {:?}: {}", resource, e);
            GatewayError::Resource
        })
    }

    async fn write_draft(
        &self,
        mailbox: &Mailbox,
        draft: &Draft,
        action: &'static str,
    ) -> GatewayResult<Value> {
        let (method, url) = match &draft.uuid {
            Some(draft_uuid) => (
                Method::PUT,
                self.endpoints.existing_draft(&mailbox.uuid, draft_uuid),
            ),
            None => (Method::POST, self.endpoints.draft(&mailbox.uuid)),
        };
        let body = serde_json::to_value(DraftPayload::new(draft, action))?;
        let (data, _) = self
            .perform_raw(mailbox.user_id, method, url, Body::Json(body))
            .await?;
        Ok(data)
    }
}

async fn decode(response: Response) -> GatewayResult<(Value, Option<DateTime<Utc>>)> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| GatewayError::Transport(TransportError::from_reqwest(&e, true)))?;

    let envelope: Envelope = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(GatewayError::Server {
                status: status.as_u16(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(error) = envelope.error.filter(|_| envelope.result != "success") {
        return Err(GatewayError::Api(error));
    }
    if !status.is_success() {
        return Err(GatewayError::Server {
            status: status.as_u16(),
        });
    }

    let response_at = envelope
        .response_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    Ok((envelope.data.unwrap_or(Value::Null), response_at))
}

fn uids_body(uids: &[String]) -> Value {
    json!({ "uids": uids })
}

fn split_name(name: &str) -> (&str, &str) {
    name.trim().split_once(' ').unwrap_or((name.trim(), ""))
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn mailboxes(&self, user: UserId) -> GatewayResult<Vec<Mailbox>> {
        let mut mailboxes: Vec<Mailbox> = self
            .perform(user, Method::GET, self.endpoints.mailboxes(), Body::Empty)
            .await?;
        for mailbox in &mut mailboxes {
            mailbox.user_id = user;
        }
        Ok(mailboxes)
    }

    async fn folders(&self, mailbox: &Mailbox) -> GatewayResult<Vec<Folder>> {
        self.perform(
            mailbox.user_id,
            Method::GET,
            self.endpoints.folders(&mailbox.uuid),
            Body::Empty,
        )
        .await
    }

    async fn threads(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        offset: u32,
        filter: Filter,
    ) -> GatewayResult<ThreadPage> {
        let url = self
            .endpoints
            .threads(&mailbox.uuid, folder_id, offset, filter.query_value());
        let (data, response_at) = self
            .perform_raw(mailbox.user_id, Method::GET, url, Body::Empty)
            .await?;
        let mut page: ThreadPage = serde_json::from_value(data)?;
        page.response_at = response_at;
        Ok(page)
    }

    async fn message(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<Message> {
        let url = self.resource(resource, &[("prefered_format", Some("html".into()))])?;
        self.perform(mailbox.user_id, Method::GET, url, Body::Empty)
            .await
    }

    async fn mark_seen(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Seen, uids_body(uids))
            .await
    }

    async fn mark_unseen(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Unseen, uids_body(uids))
            .await
    }

    async fn move_messages(
        &self,
        mailbox: &Mailbox,
        uids: &[String],
        destination_id: &str,
    ) -> GatewayResult<()> {
        self.message_action(
            mailbox,
            MessageAction::Move,
            json!({ "uids": uids, "to": destination_id }),
        )
        .await
    }

    async fn delete_messages(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Delete, uids_body(uids))
            .await
    }

    async fn star(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Star, uids_body(uids))
            .await
    }

    async fn unstar(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Unstar, uids_body(uids))
            .await
    }

    async fn report_spam(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Spam, uids_body(uids))
            .await
    }

    async fn report_ham(&self, mailbox: &Mailbox, uids: &[String]) -> GatewayResult<()> {
        self.message_action(mailbox, MessageAction::Ham, uids_body(uids))
            .await
    }

    async fn block_sender(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<()> {
        let url = self.endpoints.block_sender(resource).map_err(|e| {
            warn!("Invalid resource {:?}: {}", resource, e);
            GatewayError::Resource
        })?;
        self.perform_raw(mailbox.user_id, Method::POST, url, Body::Empty)
            .await
            .map(|_| ())
    }

    async fn draft(&self, mailbox: &Mailbox, draft_uuid: &str) -> GatewayResult<Draft> {
        let url = self.endpoints.existing_draft(&mailbox.uuid, draft_uuid);
        self.perform(mailbox.user_id, Method::GET, url, Body::Empty)
            .await
    }

    async fn draft_at(&self, mailbox: &Mailbox, resource: &str) -> GatewayResult<Draft> {
        let url = self.resource(resource, &[])?;
        self.perform(mailbox.user_id, Method::GET, url, Body::Empty)
            .await
    }

    async fn save_draft(&self, mailbox: &Mailbox, draft: &Draft) -> GatewayResult<DraftSaved> {
        let data = self.write_draft(mailbox, draft, "save").await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn send_draft(&self, mailbox: &Mailbox, draft: &Draft) -> GatewayResult<SendReceipt> {
        let data = self.write_draft(mailbox, draft, "send").await?;
        if data.is_object() {
            Ok(serde_json::from_value(data)?)
        } else {
            Ok(SendReceipt::default())
        }
    }

    async fn cancel_send(&self, mailbox: &Mailbox, cancel_resource: &str) -> GatewayResult<()> {
        let url = self.resource(cancel_resource, &[])?;
        self.perform_raw(mailbox.user_id, Method::POST, url, Body::Empty)
            .await
            .map(|_| ())
    }

    async fn create_attachment(
        &self,
        mailbox: &Mailbox,
        attachment: &NewAttachment,
    ) -> GatewayResult<Attachment> {
        let url = self.endpoints.create_attachment(&mailbox.uuid);
        let body = Body::Raw {
            data: attachment.data.clone(),
            headers: vec![
                ("x-ws-attachment-filename", attachment.name.clone()),
                ("x-ws-attachment-mime-type", attachment.mime_type.clone()),
                ("x-ws-attachment-disposition", "attachment".to_string()),
            ],
        };
        self.perform(mailbox.user_id, Method::POST, url, body).await
    }

    async fn address_books(&self, mailbox: &Mailbox) -> GatewayResult<Vec<AddressBook>> {
        let books: AddressBooks = self
            .perform(
                mailbox.user_id,
                Method::GET,
                self.endpoints.address_books(),
                Body::Empty,
            )
            .await?;
        Ok(books.addressbooks)
    }

    async fn contacts(&self, mailbox: &Mailbox) -> GatewayResult<Vec<Contact>> {
        self.perform(
            mailbox.user_id,
            Method::GET,
            self.endpoints.contacts(),
            Body::Empty,
        )
        .await
    }

    async fn add_contact(
        &self,
        mailbox: &Mailbox,
        recipient: &Recipient,
        address_book: &AddressBook,
    ) -> GatewayResult<String> {
        let (firstname, lastname) = split_name(&recipient.name);
        let body = json!({
            "addressbook_id": address_book.id,
            "firstname": firstname,
            "lastname": lastname,
            "emails": [{ "value": recipient.email }],
        });
        let (data, _) = self
            .perform_raw(
                mailbox.user_id,
                Method::POST,
                self.endpoints.add_contact(),
                Body::Json(body),
            )
            .await?;
        match data {
            Value::Number(id) => Ok(id.to_string()),
            Value::String(id) => Ok(id),
            other => Err(GatewayError::Decode(serde::de::Error::custom(format!(
                "unexpected contact id {other}"
            )))),
        }
    }

    async fn signatures(&self, mailbox: &Mailbox) -> GatewayResult<SignatureResponse> {
        let url = self
            .endpoints
            .signatures(mailbox.hosting_id, &mailbox.mailbox);
        self.perform(mailbox.user_id, Method::GET, url, Body::Empty)
            .await
    }

    async fn quotas(&self, mailbox: &Mailbox) -> GatewayResult<Quotas> {
        let url = self.endpoints.quotas(&mailbox.mailbox, mailbox.hosting_id);
        self.perform(mailbox.user_id, Method::GET, url, Body::Empty)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::gateway::auth::tests::{Behavior, FakeRefresher, token};
    use crate::mailbox::{CredentialStore, MemoryCredentialStore};

    /// Serves `responses` in order, one per connection, recording request heads.
    async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buffer.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buffer).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if buffer.len() >= end + 4 + length || n == 0 {
                            recorded.lock().unwrap().push(text);
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (format!("http://{address}/api"), seen)
    }

    fn mailbox() -> Mailbox {
        Mailbox {
            mailbox_id: 1,
            uuid: "mbx".into(),
            email: "john@example.com".into(),
            mailbox: "john".into(),
            hosting_id: 3,
            link_id: 4,
            user_id: UserId(7),
            unseen_messages: 0,
            quotas: None,
        }
    }

    fn gateway(
        base: &str,
        refresher: Arc<FakeRefresher>,
    ) -> (HttpGateway, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        store.store(UserId(7), &token("stale", 1)).unwrap();
        let auth = Arc::new(Authenticator::new(store.clone(), refresher));
        let endpoints = Endpoints::new(base, base).unwrap();
        let policy = RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(10),
        };
        (HttpGateway::with_endpoints(endpoints, auth, policy), store)
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_resends_once() {
        let (base, seen) = serve(vec![
            (401, String::new()),
            (200, r#"{"result": "success", "data": {"size": 1024}}"#.into()),
        ])
        .await;
        let refresher = Arc::new(FakeRefresher::new(Behavior::Succeed));
        let (gateway, _store) = gateway(&base, refresher.clone());

        let quotas = gateway.quotas(&mailbox()).await.unwrap();

        assert_eq!(quotas.size, 1024);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("Bearer stale"));
        assert!(requests[1].contains("fresh"));
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let (base, _seen) = serve(vec![(
            400,
            r#"{"result": "error", "error": {"code": "folder_not_found", "description": "gone"}}"#
                .into(),
        )])
        .await;
        let (gateway, _store) = gateway(&base, Arc::new(FakeRefresher::new(Behavior::Succeed)));

        let err = gateway.folders(&mailbox()).await.unwrap_err();
        match err {
            GatewayError::Api(api) => assert_eq!(api.code, "folder_not_found"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_without_payload() {
        let (base, _seen) = serve(vec![(502, "<html>bad gateway</html>".into())]).await;
        let (gateway, _store) = gateway(&base, Arc::new(FakeRefresher::new(Behavior::Succeed)));

        let err = gateway.folders(&mailbox()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { status: 502 }));
    }

    #[tokio::test]
    async fn test_thread_page_carries_response_time() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"result": "success", "data": {"threads": [], "messages_count": 0}, "response_at": 1700000000}"#
                .into(),
        )])
        .await;
        let (gateway, _store) = gateway(&base, Arc::new(FakeRefresher::new(Behavior::Succeed)));

        let page = gateway
            .threads(&mailbox(), "inbox", 50, Filter::Unseen)
            .await
            .unwrap();

        assert_eq!(page.response_at.unwrap().timestamp(), 1_700_000_000);
        let requests = seen.lock().unwrap();
        assert!(requests[0].starts_with(
            "GET /api/mail/mbx/folder/inbox/message?offset=50&thread=on&filters=unseen "
        ));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_without_request() {
        let (base, seen) = serve(Vec::new()).await;
        let (gateway, store) = gateway(&base, Arc::new(FakeRefresher::new(Behavior::Succeed)));
        store.delete(UserId(7)).unwrap();

        let err = gateway.folders(&mailbox()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoToken));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_draft_without_resource_is_local_precondition() {
        let (base, _seen) = serve(Vec::new()).await;
        let (gateway, _store) = gateway(&base, Arc::new(FakeRefresher::new(Behavior::Succeed)));
        let message = crate::store::model::tests::message("1", "drafts", 0);

        let err = gateway
            .draft_from_message(&mailbox(), &message)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Resource));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("Jane Doe"), ("Jane", "Doe"));
        assert_eq!(split_name("Cher"), ("Cher", ""));
    }
}
