//! Draft model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mailbox::Signature;
use crate::store::{Attachment, Message, Recipient};

const SIGNATURE_CLASS: &str = "editorUserSignature";

fn new_local_uuid() -> String {
    Uuid::new_v4().to_string()
}

fn default_mime_type() -> String {
    "text/html".to_string()
}

/// A message in progress.
///
/// `local_uuid` identifies the draft on this device. `uuid` is assigned by
/// the server on the first successful save; until then, saving creates the
/// draft remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Device-local identifier.
    #[serde(default = "new_local_uuid")]
    pub local_uuid: String,
    /// Server uuid, once saved.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Uid of the message backing the saved draft.
    #[serde(default)]
    pub message_uid: Option<String>,
    /// Sender identity (signature id).
    #[serde(default)]
    pub identity_id: Option<i64>,
    /// Uid of the message being answered.
    #[serde(default)]
    pub in_reply_to_uid: Option<String>,
    /// Uid of the message being forwarded.
    #[serde(default)]
    pub forwarded_uid: Option<String>,
    /// `In-Reply-To` header.
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// `References` header.
    #[serde(default)]
    pub references: Option<String>,
    /// Recipients.
    #[serde(default)]
    pub to: Vec<Recipient>,
    /// Carbon copy.
    #[serde(default)]
    pub cc: Vec<Recipient>,
    /// Blind carbon copy.
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    /// Subject.
    #[serde(default)]
    pub subject: String,
    /// HTML body.
    #[serde(default)]
    pub body: String,
    /// Body MIME type.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Uploaded attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Cancel-send window, in seconds.
    #[serde(default)]
    pub delay: Option<u32>,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            local_uuid: new_local_uuid(),
            uuid: None,
            message_uid: None,
            identity_id: None,
            in_reply_to_uid: None,
            forwarded_uid: None,
            in_reply_to: None,
            references: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            mime_type: default_mime_type(),
            attachments: Vec::new(),
            delay: None,
        }
    }
}

fn prefixed(prefix: &str, subject: &str) -> String {
    let subject = subject.trim();
    if subject
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    {
        subject.to_string()
    } else {
        format!("{prefix} {subject}")
    }
}

impl Draft {
    /// Creates an empty draft with a fresh local identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reply to `message`.
    ///
    /// Replies go to the `Reply-To` addresses when present, otherwise to the
    /// senders. With `reply_all`, the other recipients are copied, except
    /// `own_email` and addresses already in `to`.
    #[must_use]
    pub fn reply_to(message: &Message, reply_all: bool, own_email: &str) -> Self {
        let to = if message.reply_to.is_empty() {
            message.from.clone()
        } else {
            message.reply_to.clone()
        };

        let cc = if reply_all {
            let mut cc: Vec<Recipient> = Vec::new();
            for recipient in message.to.iter().chain(&message.cc) {
                let excluded = recipient.email.eq_ignore_ascii_case(own_email)
                    || to.iter().any(|r| r.email.eq_ignore_ascii_case(&recipient.email))
                    || cc.iter().any(|r| r.email.eq_ignore_ascii_case(&recipient.email));
                if !excluded {
                    cc.push(recipient.clone());
                }
            }
            cc
        } else {
            Vec::new()
        };

        Self {
            in_reply_to_uid: Some(message.uid.clone()),
            in_reply_to: message.message_id.clone(),
            references: message.message_id.clone(),
            to,
            cc,
            subject: prefixed("Re:", message.formatted_subject()),
            ..Self::default()
        }
    }

    /// Creates a forward of `message`, carrying its attachments.
    #[must_use]
    pub fn forward(message: &Message) -> Self {
        Self {
            forwarded_uid: Some(message.uid.clone()),
            subject: prefixed("Fwd:", message.formatted_subject()),
            attachments: message.attachments.clone(),
            ..Self::default()
        }
    }

    /// Sets the sender identity and appends its signature once.
    pub fn apply_signature(&mut self, signature: &Signature) {
        self.identity_id = Some(signature.id);
        if !self.body.contains(SIGNATURE_CLASS) {
            self.body.push_str(&format!(
                "<br><br><div class=\"{SIGNATURE_CLASS}\">{}</div>",
                signature.content
            ));
        }
    }

    /// True once the server has assigned an identifier.
    #[must_use]
    pub const fn is_saved_remotely(&self) -> bool {
        self.uuid.is_some()
    }

    /// True if the draft carries nothing worth keeping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
            && self.cc.is_empty()
            && self.bcc.is_empty()
            && self.subject.trim().is_empty()
            && self.body.trim().is_empty()
            && self.attachments.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::model::tests::message;

    #[test]
    fn test_new_drafts_have_distinct_local_ids() {
        assert_ne!(Draft::new().local_uuid, Draft::new().local_uuid);
        assert!(!Draft::new().is_saved_remotely());
        assert!(Draft::new().is_empty());
    }

    #[test]
    fn test_reply_all_excludes_self_and_duplicates() {
        let mut original = message("12", "inbox", 0);
        original.subject = Some("Lunch".into());
        original.message_id = Some("<abc@x>".into());
        original.from = vec![Recipient::new("ann@x.com", "Ann")];
        original.to = vec![
            Recipient::new("me@x.com", "Me"),
            Recipient::new("bob@x.com", "Bob"),
        ];
        original.cc = vec![
            Recipient::new("ANN@x.com", "Ann"),
            Recipient::new("bob@x.com", "Bob"),
        ];

        let reply = Draft::reply_to(&original, true, "me@x.com");

        assert_eq!(reply.subject, "Re: Lunch");
        assert_eq!(reply.to, vec![Recipient::new("ann@x.com", "Ann")]);
        assert_eq!(reply.cc, vec![Recipient::new("bob@x.com", "Bob")]);
        assert_eq!(reply.in_reply_to_uid.as_deref(), Some("12"));
        assert_eq!(reply.in_reply_to.as_deref(), Some("<abc@x>"));
    }

    #[test]
    fn test_reply_uses_reply_to_and_keeps_prefix() {
        let mut original = message("12", "inbox", 0);
        original.subject = Some("RE: Lunch".into());
        original.reply_to = vec![Recipient::new("list@x.com", "")];

        let reply = Draft::reply_to(&original, false, "me@x.com");
        assert_eq!(reply.subject, "RE: Lunch");
        assert_eq!(reply.to[0].email, "list@x.com");
        assert!(reply.cc.is_empty());
    }

    #[test]
    fn test_forward() {
        let mut original = message("12", "inbox", 0);
        original.subject = Some("Report".into());
        let forward = Draft::forward(&original);
        assert_eq!(forward.subject, "Fwd: Report");
        assert_eq!(forward.forwarded_uid.as_deref(), Some("12"));
        assert!(forward.to.is_empty());
    }

    #[test]
    fn test_signature_applied_once() {
        let signature = Signature {
            id: 5,
            name: "Work".into(),
            content: "<b>John</b>".into(),
            full_name: "John".into(),
            sender: "john@x.com".into(),
            is_default: true,
        };
        let mut draft = Draft::new();
        draft.apply_signature(&signature);
        draft.apply_signature(&signature);
        assert_eq!(draft.identity_id, Some(5));
        assert_eq!(draft.body.matches("<b>John</b>").count(), 1);
    }

    #[test]
    fn test_server_draft_gets_local_id() {
        let draft: Draft =
            serde_json::from_str(r#"{"uuid": "srv-1", "subject": "Hi", "body": "<p>x</p>"}"#)
                .unwrap();
        assert_eq!(draft.uuid.as_deref(), Some("srv-1"));
        assert!(!draft.local_uuid.is_empty());
        assert_eq!(draft.mime_type, "text/html");
    }
}
